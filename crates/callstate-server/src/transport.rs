//! Blocking JSON-lines client used for peer replication.
//!
//! One connection per call. Replication traffic is low-rate and each push
//! must fail independently, so connections are not pooled.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use callstate_sessions::{PeerRequest, PeerTransport, TransportError};
use callstate_types::ReplicationTarget;
use serde_json::Value;
use tracing::trace;

use crate::wire::{self, MAX_FRAME_BYTES, Request, Response};

#[derive(Debug, Default)]
pub struct TcpTransport {
    next_id: AtomicU64,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends one request to `address` and waits for its response.
    ///
    /// `timeout` bounds the whole exchange: connect, write and read share
    /// one deadline.
    pub fn request(
        &self,
        address: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let deadline = Deadline::after(timeout);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = wire::encode_line(&Request::new(id, method, params))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut stream = connect(address, &deadline)?;

        trace!(%address, method, id, "sending request");
        write_frame(&mut stream, &frame, address, &deadline)?;
        let line = read_frame(&mut stream, address, &deadline)?;

        let response: Response = serde_json::from_slice(&line)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if response.id != id {
            return Err(TransportError::Protocol(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        response
            .into_result()
            .map_err(|error| TransportError::Remote {
                code: error.code,
                message: error.message,
            })
    }
}

impl PeerTransport for TcpTransport {
    fn call(
        &self,
        target: &ReplicationTarget,
        request: &PeerRequest,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let framed =
            serde_json::to_value(request).map_err(|e| TransportError::Protocol(e.to_string()))?;
        let params = framed.get("params").cloned().unwrap_or(Value::Null);
        self.request(&target.address, request.method(), params, timeout)
            .map(|_| ())
    }
}

/// Point in time after which a call is abandoned.
struct Deadline {
    at: Instant,
    timeout: Duration,
}

impl Deadline {
    fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    /// Time left before the deadline; `Timeout` once it has passed.
    fn remaining(&self) -> Result<Duration, TransportError> {
        self.at
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
            .ok_or(TransportError::Timeout(self.timeout))
    }
}

fn connect(address: &str, deadline: &Deadline) -> Result<TcpStream, TransportError> {
    let addrs = address
        .to_socket_addrs()
        .map_err(|e| TransportError::Unreachable(format!("{address}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, deadline.remaining()?) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(match last_error {
        Some(e) => io_error(address, deadline, &e),
        None => TransportError::Unreachable(format!("{address}: no addresses")),
    })
}

fn write_frame(
    stream: &mut TcpStream,
    frame: &[u8],
    address: &str,
    deadline: &Deadline,
) -> Result<(), TransportError> {
    let mut sent = 0;
    while sent < frame.len() {
        stream
            .set_write_timeout(Some(deadline.remaining()?))
            .map_err(|e| io_error(address, deadline, &e))?;
        match stream.write(&frame[sent..]) {
            Ok(0) => {
                return Err(TransportError::Unreachable(format!(
                    "{address}: connection closed while sending"
                )));
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(io_error(address, deadline, &e)),
        }
    }
    Ok(())
}

/// Reads one newline-terminated frame, without the newline.
fn read_frame(
    stream: &mut TcpStream,
    address: &str,
    deadline: &Deadline,
) -> Result<Vec<u8>, TransportError> {
    let mut frame = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        stream
            .set_read_timeout(Some(deadline.remaining()?))
            .map_err(|e| io_error(address, deadline, &e))?;
        let read = match stream.read(&mut chunk) {
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_error(address, deadline, &e)),
        };
        if read == 0 {
            if frame.iter().all(u8::is_ascii_whitespace) {
                return Err(TransportError::Protocol(format!(
                    "{address} closed the connection without answering"
                )));
            }
            return Ok(frame);
        }

        let scanned = frame.len();
        frame.extend_from_slice(&chunk[..read]);
        if let Some(end) = frame[scanned..].iter().position(|b| *b == b'\n') {
            frame.truncate(scanned + end);
            return Ok(frame);
        }
        if frame.len() > MAX_FRAME_BYTES {
            return Err(TransportError::Protocol(format!(
                "{address} sent a frame larger than {MAX_FRAME_BYTES} bytes"
            )));
        }
    }
}

fn io_error(address: &str, deadline: &Deadline, error: &std::io::Error) -> TransportError {
    match error.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout(deadline.timeout),
        _ => TransportError::Unreachable(format!("{address}: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let err = TcpTransport::new()
            .request(
                &format!("127.0.0.1:{port}"),
                "GetActiveSessions",
                Value::Null,
                Duration::from_millis(500),
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[test]
    fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let holder = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(500));
            drop(stream);
        });

        let err = TcpTransport::new()
            .request(&address, "GetActiveSessions", Value::Null, Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(Duration::from_millis(100)));
        holder.join().unwrap();
    }

    #[test]
    fn dripping_peer_cannot_extend_the_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 256];
            let _ = stream.read(&mut request);
            for _ in 0..40 {
                thread::sleep(Duration::from_millis(30));
                if stream.write_all(b" ").is_err() {
                    break;
                }
            }
        });

        let timeout = Duration::from_millis(200);
        let started = Instant::now();
        let err = TcpTransport::new()
            .request(&address, "GetActiveSessions", Value::Null, timeout)
            .unwrap_err();
        let elapsed = started.elapsed();

        assert_eq!(err, TransportError::Timeout(timeout));
        assert!(elapsed < Duration::from_millis(600), "took {elapsed:?}");
        peer.join().unwrap();
    }

    #[test]
    fn remote_error_is_surfaced() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let request: Request = serde_json::from_str(&line).unwrap();
            let reply = wire::encode_line(&Response::error(request.id, "NOT_FOUND", "not found"))
                .unwrap();
            (&stream).write_all(&reply).unwrap();
        });

        let err = TcpTransport::new()
            .request(&address, "GetPassiveSessions", Value::Null, Duration::from_secs(2))
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Remote {
                code: "NOT_FOUND".to_string(),
                message: "not found".to_string(),
            }
        );
        peer.join().unwrap();
    }
}

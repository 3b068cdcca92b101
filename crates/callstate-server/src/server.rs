//! Tokio JSON-lines server.

use std::future::Future;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::wire::{self, MAX_FRAME_BYTES, Request, Response};

pub struct Server {
    listener: TcpListener,
    handler: RequestHandler,
    max_frame_bytes: usize,
}

impl Server {
    pub async fn bind(addr: SocketAddr, handler: RequestHandler) -> ServerResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        Ok(Self {
            listener,
            handler,
            max_frame_bytes: MAX_FRAME_BYTES,
        })
    }

    /// Overrides the largest request frame accepted (default
    /// [`MAX_FRAME_BYTES`]). Longer frames are refused before they are
    /// buffered and the connection is closed.
    #[must_use]
    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Open connections finish the request they are serving and are then
    /// closed.
    pub async fn run_until<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(%addr, node = %self.handler.service().node_id(), "server listening");

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "connection accepted");
                        let handler = self.handler.clone();
                        let stop = stop_rx.clone();
                        let limit = self.max_frame_bytes;
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler, limit, stop).await {
                                debug!(%peer, error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
            }
        }

        info!(%addr, "server shutting down");
        stop_tx.send_replace(true);
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    handler: RequestHandler,
    max_frame_bytes: usize,
    mut stop: watch::Receiver<bool>,
) -> ServerResult<()> {
    let (read_half, mut write_half) = stream.into_split();
    // One byte past the limit tells an oversized frame from one that fits.
    let frame_limit = u64::try_from(max_frame_bytes)
        .unwrap_or(u64::MAX)
        .saturating_add(1);
    let mut reader = BufReader::new(read_half).take(frame_limit);
    let mut frame = Vec::new();

    loop {
        frame.clear();
        reader.set_limit(frame_limit);
        let read = tokio::select! {
            _ = stop.changed() => return Ok(()),
            read = reader.read_until(b'\n', &mut frame) => read?,
        };
        if read == 0 {
            return Ok(());
        }
        if frame.last() == Some(&b'\n') {
            frame.pop();
        }

        if frame.len() > max_frame_bytes {
            let e = ServerError::FrameTooLarge(max_frame_bytes);
            warn!(error = %e, "closing connection");
            let response = Response::error(0, e.code(), e.to_string());
            write_half.write_all(&wire::encode_line(&response)?).await?;
            return Err(e);
        }
        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let response = match serde_json::from_slice::<Request>(&frame) {
            Ok(request) => dispatch(&handler, request).await,
            Err(e) => {
                warn!(error = %e, "malformed frame");
                let e = ServerError::Malformed(e);
                Response::error(0, e.code(), e.to_string())
            }
        };

        let encoded = wire::encode_line(&response)?;
        write_half.write_all(&encoded).await?;
    }
}

/// Runs the handler on the blocking pool; session operations may wait on
/// locks and synchronous peers.
async fn dispatch(handler: &RequestHandler, request: Request) -> Response {
    let id = request.id;
    let handler = handler.clone();
    match tokio::task::spawn_blocking(move || handler.handle(request)).await {
        Ok(response) => response,
        Err(e) => {
            let e = ServerError::Handler(e.to_string());
            error!(request_id = id, error = %e, "handler panicked");
            Response::error(id, e.code(), e.to_string())
        }
    }
}

//! # callstate-server: session registry daemon
//!
//! Exposes a [`SessionService`](callstate_sessions::SessionService) over a
//! JSON-lines TCP protocol and provides the TCP transport nodes use to
//! replicate to each other.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     callstate-server                      │
//! │  ┌────────────┐   ┌─────────────┐   ┌─────────────────┐  │
//! │  │  Server    │ → │ connection  │ → │ RequestHandler  │  │
//! │  │  (tokio)   │   │ (lines)     │   │ (spawn_blocking)│  │
//! │  └────────────┘   └─────────────┘   └────────┬────────┘  │
//! │                                              ▼           │
//! │                                       SessionService     │
//! │                                              │           │
//! │                          TcpTransport ◄──────┘ replicate │
//! └──────────────────────────────────────────────────────────┘
//! ```

mod error;
mod handler;
mod node;
mod server;
mod transport;
pub mod wire;

pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use node::Node;
pub use server::Server;
pub use transport::TcpTransport;

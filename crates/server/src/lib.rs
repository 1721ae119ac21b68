//! WebSocket server for wsfs.
//!
//! Accepts any number of peer connections on a single path, decodes their
//! JSON messages and dispatches them to a [`Handler`]. The bundled
//! [`TransferHandler`] reassembles every announced file into a local
//! directory by pulling its chunks back over the same connection.

mod connection;
mod handler;
mod server;
mod transfer;

pub use connection::{ConnectionId, PeerConnection, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{ServerConfig, WsfsServer};
pub use transfer::{TransferHandler, TransferSettings};

/// Outbound frames buffered per connection before senders wait.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid WebSocket path: {0}")]
    InvalidPath(String),
}

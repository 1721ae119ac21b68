//! Handler trait for processing peer messages.
//!
//! Implementors provide the file logic while the server framework handles
//! connection management and decoding.

use std::future::Future;
use std::pin::Pin;

use wsfs_protocol::{FileAnnounce, ReadResponse};

use crate::connection::{ConnectionId, Sender};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from connected peers.
///
/// Methods are awaited on the connection's read pump, so they must return
/// promptly; long-running work belongs in a spawned task.
pub trait Handler: Send + Sync + 'static {
    /// Called after the WebSocket upgrade of a new peer.
    fn on_peer_connected(&self, _conn: ConnectionId, _sender: Sender) -> HandlerFuture<'_> {
        Box::pin(async {})
    }

    /// Called for `fileAnnounce`.
    fn on_file_announce(
        &self,
        conn: ConnectionId,
        sender: Sender,
        announce: FileAnnounce,
    ) -> HandlerFuture<'_>;

    /// Called for `readResponse`.
    fn on_read_response(&self, conn: ConnectionId, response: ReadResponse) -> HandlerFuture<'_>;

    /// Called once the connection's read pump has stopped.
    fn on_peer_disconnected(&self, _conn: ConnectionId) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}

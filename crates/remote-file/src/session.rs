//! The write side of a peer connection, as seen by a remote file.

use std::future::Future;
use std::pin::Pin;

use wsfs_protocol::ReadRequest;

/// A boxed future returned by [`Session::send_read_request`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>>;

/// Error returned when a request cannot be handed to the connection.
#[derive(Debug, Clone, thiserror::Error)]
#[error("send failed: connection closed")]
pub struct SendError;

/// Outbound half of a peer connection.
///
/// Implementations must deliver each request as one whole message: two
/// concurrent calls never interleave on the wire. The WebSocket server
/// satisfies this by funnelling every send through a single write pump.
pub trait Session: Send + Sync + 'static {
    /// Queues a chunk request for the peer.
    fn send_read_request(&self, request: ReadRequest) -> SendFuture<'_>;
}

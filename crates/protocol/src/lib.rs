//! Wire protocol for wsfs.
//!
//! A peer announces files it holds; the server requests chunks of them by
//! offset and the peer answers with base64-encoded payloads. All messages
//! are JSON text frames discriminated by a `type` field.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use envelope::{PeerMessage, ServerMessage};
pub use messages::{
    FileAccepted, FileAnnounce, ReadRequest, ReadResponse, TransferComplete, TransferFailed,
};
pub use types::FileId;

//! Remote random-access files.
//!
//! A [`RemoteFile`] turns an asynchronous, message-oriented peer session
//! into an offset-addressable read interface that is safe for concurrent
//! callers. Each read registers a one-shot slot in a [`PendingTable`],
//! sends a `readRequest` over the [`Session`], and suspends until the
//! matching `readResponse` is delivered. The [`FileRegistry`] resolves the
//! file id carried by each response back to its file.

mod error;
pub mod file;
pub mod pending;
pub mod registry;
pub mod session;

pub use error::RemoteFileError;
pub use file::{RemoteFile, Whence};
pub use pending::{PendingSlot, PendingTable};
pub use registry::FileRegistry;
pub use session::{SendError, SendFuture, Session};

use std::time::Duration;

/// Default request path that is upgraded to a WebSocket session.
pub const WS_PATH: &str = "/ws";

/// Default listening port.
pub const WS_DEFAULT_PORT: u16 = 8015;

/// Maximum message size in bytes (64 MB).
///
/// A `readResponse` carries its chunk base64-encoded, so the limit must
/// stay comfortably above `4/3 * chunk_size`.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// How often the server pings an idle peer.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Time to wait for a pong before the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default chunk size requested from the peer (256 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 256 * 1024;

/// Timeout for a single chunk request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Message `type` discriminators.
pub const MSG_FILE_ANNOUNCE: &str = "fileAnnounce";
pub const MSG_READ_REQUEST: &str = "readRequest";
pub const MSG_READ_RESPONSE: &str = "readResponse";
pub const MSG_FILE_ACCEPTED: &str = "fileAccepted";
pub const MSG_TRANSFER_COMPLETE: &str = "transferComplete";
pub const MSG_TRANSFER_FAILED: &str = "transferFailed";

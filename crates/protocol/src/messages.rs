use serde::{Deserialize, Serialize};

use crate::types::FileId;

// ---------------------------------------------------------------------------
// Peer -> server
// ---------------------------------------------------------------------------

/// Declares a file held by the peer.
///
/// `mime` is accepted for browser clients, which send
/// `{type, size, lastModified, mime, name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAnnounce {
    pub name: String,
    pub size: u64,
    #[serde(default, alias = "mime", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
}

/// Delivers the bytes of one requested chunk.
///
/// The `data` field is base64-encoded in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    #[serde(alias = "file_id")]
    pub file_id: FileId,
    pub offset: u64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Server -> peer
// ---------------------------------------------------------------------------

/// Asks the peer for exactly `length` bytes starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub file_id: FileId,
    pub offset: u64,
    pub length: u64,
}

/// Acknowledges an announcement and tells the peer the assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAccepted {
    pub file_id: FileId,
    pub name: String,
    pub size: u64,
}

/// The file has been fully reassembled on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferComplete {
    pub file_id: FileId,
    pub bytes_copied: u64,
    /// SHA-256 of the reassembled file, hex-encoded.
    pub sha256: String,
}

/// The transfer was rejected or aborted.
///
/// `file_id` is absent when the announcement itself was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    pub name: String,
    pub error: String,
}

/// Custom base64 serde module for binary payloads carried in JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

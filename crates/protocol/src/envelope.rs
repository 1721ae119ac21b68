use serde::{Deserialize, Serialize};

use crate::messages::{
    FileAccepted, FileAnnounce, ReadRequest, ReadResponse, TransferComplete, TransferFailed,
};

/// Any message a peer may send to the server.
///
/// Messages are flat JSON objects discriminated by their `type` field,
/// e.g. `{"type":"fileAnnounce","name":"a.bin","size":10}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerMessage {
    FileAnnounce(FileAnnounce),
    ReadResponse(ReadResponse),

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

impl PeerMessage {
    /// Returns the wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::FileAnnounce(_) => crate::constants::MSG_FILE_ANNOUNCE,
            PeerMessage::ReadResponse(_) => crate::constants::MSG_READ_RESPONSE,
            PeerMessage::Unknown => "unknown",
        }
    }
}

/// Any message the server may send to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    ReadRequest(ReadRequest),
    FileAccepted(FileAccepted),
    TransferComplete(TransferComplete),
    TransferFailed(TransferFailed),
}

impl ServerMessage {
    /// Returns the wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ReadRequest(_) => crate::constants::MSG_READ_REQUEST,
            ServerMessage::FileAccepted(_) => crate::constants::MSG_FILE_ACCEPTED,
            ServerMessage::TransferComplete(_) => crate::constants::MSG_TRANSFER_COMPLETE,
            ServerMessage::TransferFailed(_) => crate::constants::MSG_TRANSFER_FAILED,
        }
    }
}

impl From<ReadRequest> for ServerMessage {
    fn from(req: ReadRequest) -> Self {
        ServerMessage::ReadRequest(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileId;

    #[test]
    fn peer_announce_from_browser_json() {
        let json = r#"{"type":"fileAnnounce","size":1048576,"lastModified":1,"mime":"video/mp4","name":"clip.mp4"}"#;
        let msg: PeerMessage = serde_json::from_str(json).unwrap();
        match msg {
            PeerMessage::FileAnnounce(ann) => {
                assert_eq!(ann.name, "clip.mp4");
                assert_eq!(ann.size, 1_048_576);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn peer_read_response() {
        let json = r#"{"type":"readResponse","fileId":"f1","offset":9,"data":"eA=="}"#;
        let msg: PeerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind(), "readResponse");
        match msg {
            PeerMessage::ReadResponse(resp) => {
                assert_eq!(resp.offset, 9);
                assert_eq!(resp.data, b"x");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_peer_message_type() {
        let msg: PeerMessage = serde_json::from_str(r#"{"type":"clientAnnounce"}"#).unwrap();
        assert_eq!(msg, PeerMessage::Unknown);
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(serde_json::from_str::<PeerMessage>(r#"{"name":"a","size":1}"#).is_err());
    }

    #[test]
    fn malformed_known_type_is_an_error() {
        let json = r#"{"type":"readResponse","fileId":"f1"}"#;
        assert!(serde_json::from_str::<PeerMessage>(json).is_err());
    }

    #[test]
    fn read_request_is_flat_and_tagged() {
        let msg = ServerMessage::from(ReadRequest {
            file_id: FileId::from("f1"),
            offset: 262144,
            length: 262144,
        });
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "readRequest");
        assert_eq!(value["fileId"], "f1");
        assert_eq!(value["offset"], 262144);
        assert_eq!(value["length"], 262144);
    }

    #[test]
    fn transfer_complete_tagged() {
        let msg = ServerMessage::TransferComplete(TransferComplete {
            file_id: FileId::from("f1"),
            bytes_copied: 10,
            sha256: "00".into(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"transferComplete\""));
        assert!(json.contains("\"bytesCopied\":10"));
        assert_eq!(msg.kind(), "transferComplete");
    }
}

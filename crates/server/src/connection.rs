//! Peer connection management: read/write pumps, ping/pong, send buffering.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use wsfs_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT};
use wsfs_protocol::{PeerMessage, ReadRequest, ServerMessage};
use wsfs_remote_file::{SendError, SendFuture, Session};

use crate::handler::Handler;
use crate::{SEND_BUFFER_SIZE, ServerError};

/// Identifies one accepted peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle for sending messages to one peer.
///
/// Cloneable and cheap; wraps an `mpsc::Sender` drained by the
/// connection's write pump, which keeps whole messages from interleaving.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Queues a [`ServerMessage`] as a JSON text frame, waiting for buffer
    /// space if the peer is slow.
    ///
    /// Fails only if the connection is gone.
    pub async fn send_msg(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let json = serde_json::to_string(msg).map_err(|e| {
            error!(kind = msg.kind(), "failed to encode message: {e}");
            SendError
        })?;
        self.tx
            .send(WsMessage::Text(json.into()))
            .await
            .map_err(|_| SendError)
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// A sender whose frames land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Session for Sender {
    fn send_read_request(&self, request: ReadRequest) -> SendFuture<'_> {
        Box::pin(async move { self.send_msg(&ServerMessage::from(request)).await })
    }
}

/// An accepted peer connection.
///
/// Owns the read/write pump tasks and provides a [`Sender`] for
/// asynchronous message delivery.
pub struct PeerConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl PeerConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals both pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Waits until the read pump has stopped and the handler has been told.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }

    /// Token cancelled once the disconnect has been handled.
    pub(crate) fn finished_token(&self) -> CancellationToken {
        self.finished.clone()
    }

    /// Signals shutdown and waits for the disconnect to be handled.
    pub async fn close_and_wait(&self) {
        self.close();
        self.closed().await;
    }
}

/// Runs the read and write pumps for an upgraded WebSocket.
///
/// The pumps run as background tokio tasks and stop when the peer goes
/// away or `server_cancel` fires. Afterwards the handler receives
/// [`Handler::on_peer_disconnected`].
pub fn spawn_connection<S, H>(
    ws_stream: S,
    remote_addr: SocketAddr,
    handler: Arc<H>,
    server_cancel: &CancellationToken,
) -> PeerConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let id = ConnectionId::new();
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let finished = CancellationToken::new();
    let sender = Sender { tx };

    let conn = PeerConnection {
        id,
        remote_addr,
        sender: sender.clone(),
        cancel: cancel.clone(),
        finished: finished.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    tokio::spawn(async move {
        handler.on_peer_connected(id, sender.clone()).await;
        read_pump(ws_stream, id, sender, Arc::clone(&handler), cancel.clone()).await;
        // When the read pump exits, stop the write pump too.
        cancel.cancel();
        handler.on_peer_disconnected(id).await;
        info!(conn = %id, %remote_addr, "peer disconnected");
        finished.cancel();
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                let Some(ws_msg) = msg else { break };
                if let Err(e) = sink.send(ws_msg).await {
                    error!("write pump send error: {e}");
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches them to the handler.
async fn read_pump<S, H>(
    mut stream: S,
    id: ConnectionId,
    sender: Sender,
    handler: Arc<H>,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut got_pong = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !got_pong {
                    warn!(conn = %id, "pong timeout, closing connection");
                    break;
                }
                got_pong = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if text.len() > WS_MAX_MESSAGE_SIZE {
                            error!(conn = %id, "message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                            continue;
                        }
                        if let Err(e) = dispatch_text(handler.as_ref(), id, &sender, &text).await {
                            error!(conn = %id, "closing connection on undecodable message: {e}");
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => {
                        warn!(conn = %id, len = data.len(), "ignoring binary frame");
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        got_pong = true;
                        pong_deadline.reset();
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.tx.try_send(WsMessage::Pong(data));
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(conn = %id, "received close frame");
                        break;
                    }
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Err(e)) => {
                        error!(conn = %id, "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

/// Decodes a text frame and routes it to the matching handler method.
///
/// Unknown message types are ignored; malformed JSON is an error.
async fn dispatch_text<H: Handler>(
    handler: &H,
    id: ConnectionId,
    sender: &Sender,
    text: &str,
) -> Result<(), ServerError> {
    let msg: PeerMessage = serde_json::from_str(text)?;
    match msg {
        PeerMessage::FileAnnounce(announce) => {
            handler.on_file_announce(id, sender.clone(), announce).await;
        }
        PeerMessage::ReadResponse(response) => {
            handler.on_read_response(id, response).await;
        }
        PeerMessage::Unknown => {
            warn!(conn = %id, "ignoring message of unknown type");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerFuture;
    use futures_util::{sink, stream};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_tungstenite::tungstenite;
    use wsfs_protocol::{FileAnnounce, FileId, ReadResponse};

    #[derive(Default)]
    struct Recorder {
        announces: Mutex<Vec<FileAnnounce>>,
        responses: Mutex<Vec<ReadResponse>>,
        disconnected: AtomicBool,
    }

    impl Handler for Recorder {
        fn on_file_announce(
            &self,
            _conn: ConnectionId,
            _sender: Sender,
            announce: FileAnnounce,
        ) -> HandlerFuture<'_> {
            self.announces.lock().unwrap().push(announce);
            Box::pin(async {})
        }

        fn on_read_response(&self, _conn: ConnectionId, response: ReadResponse) -> HandlerFuture<'_> {
            self.responses.lock().unwrap().push(response);
            Box::pin(async {})
        }

        fn on_peer_disconnected(&self, _conn: ConnectionId) -> HandlerFuture<'_> {
            self.disconnected.store(true, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    fn text(json: &str) -> Result<WsMessage, tungstenite::Error> {
        Ok(WsMessage::Text(json.to_string().into()))
    }

    fn sender() -> (Sender, mpsc::Receiver<WsMessage>) {
        Sender::channel(16)
    }

    #[tokio::test]
    async fn read_pump_dispatches_by_type() {
        let handler = Arc::new(Recorder::default());
        let (sender, _rx) = sender();
        let frames = stream::iter(vec![
            text(r#"{"type":"fileAnnounce","name":"a.bin","size":3}"#),
            text(r#"{"type":"clientHello"}"#),
            Ok(WsMessage::Binary(vec![1, 2, 3].into())),
            text(r#"{"type":"readResponse","fileId":"f1","offset":0,"data":"YWJj"}"#),
        ]);

        read_pump(frames, ConnectionId::new(), sender, Arc::clone(&handler), CancellationToken::new()).await;

        let announces = handler.announces.lock().unwrap();
        assert_eq!(announces.len(), 1);
        assert_eq!(announces[0].name, "a.bin");
        let responses = handler.responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].file_id, FileId::from("f1"));
        assert_eq!(responses[0].data, b"abc");
    }

    #[tokio::test]
    async fn read_pump_stops_on_malformed_json() {
        let handler = Arc::new(Recorder::default());
        let (sender, _rx) = sender();
        let frames = stream::iter(vec![
            text("not valid json {{{"),
            text(r#"{"type":"fileAnnounce","name":"late.bin","size":1}"#),
        ]);

        read_pump(frames, ConnectionId::new(), sender, Arc::clone(&handler), CancellationToken::new()).await;

        assert!(handler.announces.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_pump_answers_ping() {
        let handler = Arc::new(Recorder::default());
        let (sender, mut rx) = sender();
        let frames = stream::iter(vec![Ok(WsMessage::Ping(vec![7].into()))]);

        read_pump(frames, ConnectionId::new(), sender, handler, CancellationToken::new()).await;

        assert!(matches!(rx.recv().await, Some(WsMessage::Pong(data)) if data[..] == [7u8]));
    }

    #[tokio::test]
    async fn read_pump_times_out_on_silence() {
        tokio::time::pause();

        let handler = Arc::new(Recorder::default());
        let (sender, _rx) = sender();
        let silent = stream::pending::<Result<WsMessage, tungstenite::Error>>();

        // Two deadline ticks without a pong end the pump.
        tokio::time::timeout(
            WS_PONG_WAIT * 3,
            read_pump(silent, ConnectionId::new(), sender, handler, CancellationToken::new()),
        )
        .await
        .expect("read pump should stop after missing pongs");
    }

    #[tokio::test]
    async fn write_pump_sends_queued_messages_then_closes() {
        let (sink_tx, mut sink_rx) = mpsc::channel::<WsMessage>(16);
        let sink = Box::pin(sink::unfold(sink_tx, |tx, msg: WsMessage| async move {
            let _ = tx.send(msg).await;
            Ok::<_, tungstenite::Error>(tx)
        }));

        let (sender, rx) = sender();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(sink, rx, cancel.clone()));

        let request = ServerMessage::from(ReadRequest {
            file_id: FileId::from("f1"),
            offset: 3,
            length: 3,
        });
        sender.send_msg(&request).await.unwrap();

        // The first tick of the ping interval fires immediately.
        let mut saw_request = false;
        while !saw_request {
            match sink_rx.recv().await.unwrap() {
                WsMessage::Text(json) => {
                    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
                    assert_eq!(value["type"], "readRequest");
                    assert_eq!(value["offset"], 3);
                    saw_request = true;
                }
                WsMessage::Ping(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }

        cancel.cancel();
        handle.await.unwrap();
        let mut last = None;
        while let Some(frame) = sink_rx.recv().await {
            if !matches!(frame, WsMessage::Ping(_)) {
                last = Some(frame);
                break;
            }
        }
        assert!(matches!(last, Some(WsMessage::Close(_))));
    }

    #[tokio::test]
    async fn sender_fails_once_connection_is_gone() {
        let (sender, rx) = sender();
        drop(rx);
        assert!(!sender.is_connected());

        let request = ReadRequest {
            file_id: FileId::from("f1"),
            offset: 0,
            length: 1,
        };
        assert!(sender.send_read_request(request).await.is_err());
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}

//! wsfs WebSocket server.
//!
//! Listens on a TCP port, upgrades HTTP GET requests for the configured
//! path to WebSocket and runs one [`PeerConnection`] per peer.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wsfs_protocol::constants::{WS_DEFAULT_PORT, WS_MAX_MESSAGE_SIZE, WS_PATH};

use crate::ServerError;
use crate::connection::{self, ConnectionId, PeerConnection};
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Request path that is upgraded to WebSocket; anything else gets 404.
    pub path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: WS_DEFAULT_PORT,
            path: WS_PATH.to_string(),
        }
    }
}

/// The wsfs WebSocket server.
///
/// Serves any number of peers at once and dispatches their messages to the
/// provided [`Handler`].
pub struct WsfsServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    connections: Mutex<HashMap<ConnectionId, PeerConnection>>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> WsfsServer<H> {
    /// Creates a new server with the given handler.
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Self::with_handler(config, Arc::new(handler))
    }

    /// Creates a server around a handler the caller keeps a reference to.
    pub fn with_handler(config: ServerConfig, handler: Arc<H>) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler,
            connections: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of peers currently connected.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Gracefully shuts down the server and every connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    ///
    /// Binds to the configured address and accepts WebSocket connections.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if !self.config.path.starts_with('/') {
            return Err(ServerError::InvalidPath(self.config.path.clone()));
        }

        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!(path = %self.config.path, "wsfs server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("server shutting down");
                    self.close_all().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Closes every connection and waits for their disconnects to be handled.
    async fn close_all(&self) {
        let conns: Vec<PeerConnection> = self
            .connections
            .lock()
            .await
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in &conns {
            conn.close_and_wait().await;
        }
    }

    /// Upgrades one TCP connection and tracks it until the peer leaves.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let expected_path = self.config.path.clone();
        let check_path = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().path() == expected_path {
                return Ok(resp);
            }
            let mut reject = ErrorResponse::new(Some("not found".to_string()));
            *reject.status_mut() = StatusCode::NOT_FOUND;
            Err(reject)
        };

        // WebSocket upgrade with size limits matching our protocol constants.
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_hdr_async_with_config(stream, check_path, Some(ws_config)).await?;
        info!(%peer_addr, "WebSocket connection established");

        let conn = connection::spawn_connection(
            ws_stream,
            peer_addr,
            Arc::clone(&self.handler),
            &self.cancel,
        );
        let id = conn.id();
        let finished = conn.finished_token();
        self.connections.lock().await.insert(id, conn);

        // Shutdown may have drained the map before this insert.
        if self.cancel.is_cancelled() {
            if let Some(conn) = self.connections.lock().await.remove(&id) {
                conn.close_and_wait().await;
            }
            return Ok(());
        }

        finished.cancelled().await;
        self.connections.lock().await.remove(&id);
        Ok(())
    }
}

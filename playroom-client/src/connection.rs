//! Room Server Connection
//!
//! WebSocket client for the room server. Requests that expect an answer
//! (create, join) are matched to their response by `request_id`; input is
//! fire-and-forget. When the socket drops, the client reconnects with
//! exponential backoff, authenticates again, and re-subscribes to its room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use playroom::network::{
    protocol::{RoomInfo, ServerError},
    ClientMessage, InputEvent, MembershipUpdate, ServerMessage,
};
use playroom::{GameSource, Identity, RoomCode};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Pending = Mutex<HashMap<u64, oneshot::Sender<ServerMessage>>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `ws://127.0.0.1:4000`.
    pub url: String,
    /// Bearer token presented on every (re)connect.
    pub token: String,
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the reconnect delay.
    pub max_backoff: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// How long a request waits for its response.
    pub request_timeout: Duration,
    /// Outgoing frames buffered while the socket is busy or reconnecting.
    pub outgoing_buffer: usize,
}

impl ClientConfig {
    /// Defaults for `url` and `token`.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            max_reconnect_attempts: 10,
            request_timeout: Duration::from_secs(10),
            outgoing_buffer: 64,
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Could not open the socket.
    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// Server refused the token.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Server answered with an error.
    #[error("Server error: {}", .0.message)]
    Server(ServerError),

    /// No response in time.
    #[error("Request timed out")]
    Timeout,

    /// Connection is gone.
    #[error("Connection closed")]
    Closed,

    /// Response of the wrong kind.
    #[error("Unexpected response: {0}")]
    Unexpected(String),
}

/// Things the application needs to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Membership of the current room changed.
    Membership(MembershipUpdate),
    /// Key event from the other player.
    Input {
        /// Room code.
        code: RoomCode,
        /// Key transition.
        event: InputEvent,
    },
    /// Error not tied to a request.
    Error(ServerError),
    /// Socket lost; reconnecting.
    Reconnecting {
        /// Attempt about to be made.
        attempt: u32,
    },
    /// Socket restored and re-authenticated.
    Reconnected,
    /// Gave up reconnecting, or the server shut down.
    Disconnected,
}

struct Shared {
    pending: Pending,
    room: Mutex<Option<RoomCode>>,
}

/// Connection to the room server.
pub struct RoomClient {
    identity: Identity,
    outgoing: mpsc::Sender<ClientMessage>,
    shared: Arc<Shared>,
    next_request: AtomicU64,
    request_timeout: Duration,
}

impl RoomClient {
    /// Connect and authenticate. Returns the client and its event stream.
    pub async fn connect(config: ClientConfig) -> Result<(Self, mpsc::Receiver<ClientEvent>), ClientError> {
        let (socket, identity) = handshake(&config).await?;
        info!("Connected to {} as {}", config.url, identity);

        let (outgoing_tx, outgoing_rx) = mpsc::channel(config.outgoing_buffer);
        let (events_tx, events_rx) = mpsc::channel(config.outgoing_buffer);
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            room: Mutex::new(None),
        });

        let client = Self {
            identity,
            outgoing: outgoing_tx,
            shared: shared.clone(),
            next_request: AtomicU64::new(1),
            request_timeout: config.request_timeout,
        };

        tokio::spawn(drive(socket, config, shared, outgoing_rx, events_tx));
        Ok((client, events_rx))
    }

    /// Identity the server bound to this connection.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Room this client is in, if any.
    pub async fn current_room(&self) -> Option<RoomCode> {
        self.shared.room.lock().await.clone()
    }

    /// Create a room and enter it.
    pub async fn create_room(&self, source: GameSource) -> Result<RoomInfo, ClientError> {
        let response = self
            .request(|request_id| ClientMessage::CreateRoom { request_id, source })
            .await?;
        match response {
            ServerMessage::RoomCreated(info) => {
                *self.shared.room.lock().await = Some(info.code.clone());
                Ok(info)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Join a room by the code a user typed.
    pub async fn join_room(&self, code: &str) -> Result<RoomInfo, ClientError> {
        let code = RoomCode::parse(code);
        let response = self
            .request(|request_id| ClientMessage::JoinRoom { request_id, code })
            .await?;
        match response {
            ServerMessage::RoomJoined(info) => {
                *self.shared.room.lock().await = Some(info.code.clone());
                Ok(info)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Leave the current room.
    pub async fn leave(&self) -> Result<(), ClientError> {
        let Some(code) = self.shared.room.lock().await.take() else {
            return Ok(());
        };
        self.outgoing
            .send(ClientMessage::Leave { code })
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Send a key event to the room. Never waits; returns false if the event
    /// was dropped.
    pub fn send_input(&self, code: &RoomCode, event: InputEvent) -> bool {
        self.outgoing
            .try_send(ClientMessage::Input {
                code: code.clone(),
                event,
            })
            .is_ok()
    }

    async fn request<F>(&self, build: F) -> Result<ServerMessage, ClientError>
    where
        F: FnOnce(u64) -> ClientMessage,
    {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(request_id, tx);

        if self.outgoing.send(build(request_id)).await.is_err() {
            self.shared.pending.lock().await.remove(&request_id);
            return Err(ClientError::Closed);
        }

        let response = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => {
                self.shared.pending.lock().await.remove(&request_id);
                return Err(ClientError::Timeout);
            }
        };

        match response {
            ServerMessage::Error(e) => Err(ClientError::Server(e)),
            other => Ok(other),
        }
    }
}

fn unexpected(message: ServerMessage) -> ClientError {
    ClientError::Unexpected(format!("{:?}", message))
}

/// Open a socket and authenticate on it.
async fn handshake(config: &ClientConfig) -> Result<(Socket, Identity), ClientError> {
    let (mut socket, _) = connect_async(config.url.as_str()).await?;
    send_frame(&mut socket, &ClientMessage::Auth { token: config.token.clone() }).await?;

    let wait = async {
        while let Some(frame) = socket.next().await {
            let Message::Text(text) = frame? else { continue };
            match ServerMessage::from_json(&text) {
                Ok(ServerMessage::AuthResult(result)) => {
                    return match (result.success, result.identity) {
                        (true, Some(identity)) => Ok(identity),
                        (_, _) => Err(ClientError::Auth(
                            result.error.unwrap_or_else(|| "rejected".to_string()),
                        )),
                    };
                }
                Ok(other) => trace!("Ignoring {:?} before auth", other),
                Err(e) => debug!("Unparseable frame before auth: {}", e),
            }
        }
        Err::<Identity, ClientError>(ClientError::Closed)
    };

    let identity = tokio::time::timeout(config.request_timeout, wait)
        .await
        .map_err(|_| ClientError::Timeout)??;
    Ok((socket, identity))
}

async fn send_frame(socket: &mut Socket, message: &ClientMessage) -> Result<(), ClientError> {
    let text = message
        .to_json()
        .map_err(|e| ClientError::Unexpected(e.to_string()))?;
    socket.send(Message::Text(text)).await?;
    Ok(())
}

enum PumpExit {
    /// The application dropped the client.
    ClientGone,
    /// The socket failed or closed.
    SocketLost,
    /// The server announced shutdown.
    ServerShutdown,
}

/// Connection task: pumps one socket at a time, reconnecting as needed.
async fn drive(
    mut socket: Socket,
    config: ClientConfig,
    shared: Arc<Shared>,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    events: mpsc::Sender<ClientEvent>,
) {
    loop {
        match pump(&mut socket, &shared, &mut outgoing, &events).await {
            PumpExit::ClientGone => {
                let _ = socket.close(None).await;
                return;
            }
            PumpExit::ServerShutdown => {
                let _ = events.send(ClientEvent::Disconnected).await;
                return;
            }
            PumpExit::SocketLost => {}
        }

        // Outstanding requests cannot be answered on a new socket.
        shared.pending.lock().await.clear();

        match reconnect(&config, &shared, &events).await {
            Some(fresh) => {
                socket = fresh;
                let _ = events.send(ClientEvent::Reconnected).await;
            }
            None => {
                warn!("Giving up on {} after {} attempts", config.url, config.max_reconnect_attempts);
                let _ = events.send(ClientEvent::Disconnected).await;
                return;
            }
        }
    }
}

async fn pump(
    socket: &mut Socket,
    shared: &Shared,
    outgoing: &mut mpsc::Receiver<ClientMessage>,
    events: &mpsc::Sender<ClientEvent>,
) -> PumpExit {
    loop {
        tokio::select! {
            frame = socket.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => return PumpExit::SocketLost,
                    Some(Err(e)) => {
                        debug!("Socket error: {}", e);
                        return PumpExit::SocketLost;
                    }
                    Some(Ok(_)) => continue,
                };
                let message = match ServerMessage::from_json(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("Failed to parse server message: {}", e);
                        continue;
                    }
                };
                if let Some(exit) = route(message, shared, events).await {
                    return exit;
                }
            }
            message = outgoing.recv() => {
                let Some(message) = message else {
                    return PumpExit::ClientGone;
                };
                if let Err(e) = send_frame(socket, &message).await {
                    debug!("Send failed: {}", e);
                    return PumpExit::SocketLost;
                }
            }
        }
    }
}

async fn route(message: ServerMessage, shared: &Shared, events: &mpsc::Sender<ClientEvent>) -> Option<PumpExit> {
    let request_id = match &message {
        ServerMessage::RoomCreated(info) | ServerMessage::RoomJoined(info) => Some(info.request_id),
        ServerMessage::Error(e) => e.request_id,
        _ => None,
    };
    if let Some(request_id) = request_id {
        resolve(shared, request_id, message).await;
        return None;
    }

    let event = match message {
        ServerMessage::Error(e) => ClientEvent::Error(e),
        ServerMessage::MembershipUpdate(update) => ClientEvent::Membership(update),
        ServerMessage::Input { code, event } => ClientEvent::Input { code, event },
        ServerMessage::Shutdown { reason } => {
            info!("Server shutting down: {}", reason);
            return Some(PumpExit::ServerShutdown);
        }
        ServerMessage::RoomCreated(_)
        | ServerMessage::RoomJoined(_)
        | ServerMessage::AuthResult(_)
        | ServerMessage::Pong { .. } => return None,
    };

    if events.send(event).await.is_err() {
        trace!("Event receiver dropped");
    }
    None
}

async fn resolve(shared: &Shared, request_id: u64, message: ServerMessage) {
    match shared.pending.lock().await.remove(&request_id) {
        Some(tx) => {
            let _ = tx.send(message);
        }
        None => debug!(request_id, "Response for unknown request"),
    }
}

async fn reconnect(config: &ClientConfig, shared: &Shared, events: &mpsc::Sender<ClientEvent>) -> Option<Socket> {
    let mut delay = config.initial_backoff;

    for attempt in 1..=config.max_reconnect_attempts {
        let _ = events.send(ClientEvent::Reconnecting { attempt }).await;
        tokio::time::sleep(delay).await;

        match handshake(config).await {
            Ok((mut socket, identity)) => {
                info!("Reconnected as {} after {} attempts", identity, attempt);
                let room = shared.room.lock().await.clone();
                if let Some(code) = room {
                    if let Err(e) = send_frame(&mut socket, &ClientMessage::Subscribe { code }).await {
                        debug!("Re-subscribe failed: {}", e);
                        continue;
                    }
                }
                return Some(socket);
            }
            Err(e) => debug!(attempt, "Reconnect failed: {}", e),
        }

        delay = (delay * 2).min(config.max_backoff);
    }
    None
}

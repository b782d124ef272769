//! WebSocket Room Server
//!
//! Async WebSocket server for room coordination.
//! Handles authentication, room requests, and input relay.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::ServerConfig;
use crate::game::{GameSource, GameStore};
use crate::network::auth::Authenticator;
use crate::network::hub::{ConnectionId, Outbound, RelayOutcome, Subscriber, TopicHub};
use crate::network::protocol::{
    AuthResult, ClientMessage, ErrorCode, InputEvent, RoomInfo, ServerMessage,
};
use crate::room::{Identity, MemoryDirectory, RoomCode, RoomCoordinator, RoomError, RoomView};

/// Time the writer gets to flush queued frames after the reader stops.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Room server errors.
#[derive(Debug, thiserror::Error)]
pub enum RoomServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Registry entry for an open connection.
struct ConnectedClient {
    addr: SocketAddr,
    connected_at: Instant,
}

type ClientRegistry = Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>;

/// Shared handles every connection task works with.
#[derive(Clone)]
struct Context {
    config: Arc<ServerConfig>,
    auth: Arc<dyn Authenticator>,
    coordinator: Arc<RoomCoordinator>,
}

/// Per-connection state, owned by the connection task.
struct ConnectionState {
    id: ConnectionId,
    addr: SocketAddr,
    identity: Option<Identity>,
    room: Option<RoomCode>,
    outbound: Outbound,
}

impl ConnectionState {
    fn subscriber(&self, identity: &Identity) -> Subscriber {
        Subscriber {
            connection: self.id,
            identity: identity.clone(),
            outbound: self.outbound.clone(),
        }
    }

    fn send(&self, message: ServerMessage) {
        if !self.outbound.send_control(message) {
            trace!(addr = %self.addr, "Writer gone, response dropped");
        }
    }
}

/// The room server.
pub struct RoomServer {
    ctx: Context,
    clients: ClientRegistry,
    shutdown_tx: broadcast::Sender<()>,
}

impl RoomServer {
    /// Create a server with an in-memory session directory.
    pub fn new(config: ServerConfig, auth: Arc<dyn Authenticator>, games: Arc<dyn GameStore>) -> Self {
        let coordinator = RoomCoordinator::new(
            Arc::new(MemoryDirectory::new()),
            games,
            Arc::new(TopicHub::new()),
            config.coordinator.clone(),
        );
        Self::with_coordinator(config, auth, Arc::new(coordinator))
    }

    /// Create a server around an existing coordinator.
    pub fn with_coordinator(
        config: ServerConfig,
        auth: Arc<dyn Authenticator>,
        coordinator: Arc<RoomCoordinator>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            ctx: Context {
                config: Arc::new(config),
                auth,
                coordinator,
            },
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), RoomServerError> {
        let listener = TcpListener::bind(&self.ctx.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RoomServerError> {
        let local_addr = listener.local_addr()?;
        info!("Room server listening on {}", local_addr);

        let cleanup_ctx = self.ctx.clone();
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_ctx).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.ctx.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ctx = self.ctx.clone();
        let clients = self.clients.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (outbound, mut outbound_rx) = Outbound::channel(ctx.config.input_buffer);

            let id = ConnectionId::new_v4();
            clients.write().await.insert(id, ConnectedClient {
                addr,
                connected_at: Instant::now(),
            });

            let mut writer = tokio::spawn(async move {
                while let Some(msg) = outbound_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let mut state = ConnectionState {
                id,
                addr,
                identity: None,
                room: None,
                outbound,
            };

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match ClientMessage::from_json(&text) {
                                    Ok(client_msg) => {
                                        Self::handle_client_message(&ctx, &mut state, client_msg).await;
                                    }
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        state.send(ServerMessage::error(
                                            None,
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        ));
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        state.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Disconnect hook: give up the seat unless another connection holds it.
            if let (Some(identity), Some(room)) = (state.identity.take(), state.room.take()) {
                ctx.coordinator.disconnect(&identity, &room, id).await;
            }

            drop(state);
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
                writer.abort();
            }

            if let Some(client) = clients.write().await.remove(&id) {
                debug!(
                    addr = %client.addr,
                    connected_for = ?client.connected_at.elapsed(),
                    "Client cleaned up"
                );
            }
        });
    }

    /// Handle a client message.
    async fn handle_client_message(ctx: &Context, state: &mut ConnectionState, msg: ClientMessage) {
        match msg {
            ClientMessage::Auth { token } => {
                Self::handle_auth(ctx, state, &token).await;
            }
            ClientMessage::CreateRoom { request_id, source } => {
                Self::handle_create(ctx, state, request_id, source).await;
            }
            ClientMessage::JoinRoom { request_id, code } => {
                Self::handle_join(ctx, state, request_id, code).await;
            }
            ClientMessage::Subscribe { code } => {
                Self::handle_subscribe(ctx, state, code).await;
            }
            ClientMessage::Leave { code } => {
                Self::handle_leave(ctx, state, code).await;
            }
            ClientMessage::Input { code, event } => {
                Self::handle_input(ctx, state, code, event);
            }
            ClientMessage::Ping { timestamp } => {
                state.send(ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                });
            }
        }
    }

    /// Handle authentication.
    async fn handle_auth(ctx: &Context, state: &mut ConnectionState, token: &str) {
        let identity = match ctx.auth.authenticate(token) {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Client {} failed auth: {}", state.addr, e);
                state.send(ServerMessage::AuthResult(AuthResult {
                    success: false,
                    identity: None,
                    error: Some(e.to_string()),
                    server_version: ctx.config.version.clone(),
                }));
                return;
            }
        };

        // A different identity cannot inherit the seat of the previous one.
        if state.identity.as_ref() != Some(&identity) {
            if let (Some(previous), Some(room)) = (state.identity.take(), state.room.take()) {
                ctx.coordinator.leave_room(&previous, &room, Some(state.id)).await;
            }
        }

        debug!("Client {} authenticated as {}", state.addr, identity);
        state.identity = Some(identity.clone());
        state.send(ServerMessage::AuthResult(AuthResult {
            success: true,
            identity: Some(identity),
            error: None,
            server_version: ctx.config.version.clone(),
        }));
    }

    /// Handle a create request.
    async fn handle_create(
        ctx: &Context,
        state: &mut ConnectionState,
        request_id: u64,
        source: GameSource,
    ) {
        let Some(identity) = state.identity.clone() else {
            state.send(not_authenticated(Some(request_id)));
            return;
        };

        let subscriber = state.subscriber(&identity);
        match ctx.coordinator.create_room(&identity, source, Some(subscriber)).await {
            Ok(view) => {
                Self::switch_room(ctx, state, &identity, &view.code).await;
                state.send(ServerMessage::RoomCreated(room_info(request_id, view)));
            }
            Err(e) => state.send(room_error(Some(request_id), &e)),
        }
    }

    /// Handle a join request.
    async fn handle_join(ctx: &Context, state: &mut ConnectionState, request_id: u64, code: RoomCode) {
        let Some(identity) = state.identity.clone() else {
            state.send(not_authenticated(Some(request_id)));
            return;
        };

        let subscriber = state.subscriber(&identity);
        match ctx.coordinator.join_room(&identity, &code, Some(subscriber)).await {
            Ok(view) => {
                Self::switch_room(ctx, state, &identity, &view.code).await;
                state.send(ServerMessage::RoomJoined(room_info(request_id, view)));
            }
            Err(e) => state.send(room_error(Some(request_id), &e)),
        }
    }

    /// Handle a topic subscription.
    async fn handle_subscribe(ctx: &Context, state: &mut ConnectionState, code: RoomCode) {
        let Some(identity) = state.identity.clone() else {
            state.send(not_authenticated(None));
            return;
        };

        let subscriber = state.subscriber(&identity);
        match ctx.coordinator.subscribe(&identity, &code, subscriber).await {
            Ok(_) => Self::switch_room(ctx, state, &identity, &code).await,
            Err(e) => state.send(room_error(None, &e)),
        }
    }

    /// Handle an explicit leave.
    async fn handle_leave(ctx: &Context, state: &mut ConnectionState, code: RoomCode) {
        let Some(identity) = state.identity.clone() else {
            state.send(not_authenticated(None));
            return;
        };

        ctx.coordinator.leave_room(&identity, &code, Some(state.id)).await;
        if state.room.as_ref() == Some(&code) {
            state.room = None;
        }
    }

    /// Relay a key event. Never waits and never answers.
    fn handle_input(ctx: &Context, state: &ConnectionState, code: RoomCode, event: InputEvent) {
        match ctx.coordinator.hub().relay_input(&code, state.id, event) {
            RelayOutcome::Delivered(n) => trace!(room = %code, delivered = n, "Input relayed"),
            RelayOutcome::NotSubscribed => {
                trace!(addr = %state.addr, room = %code, "Input for unsubscribed room dropped");
            }
        }
    }

    /// Record `code` as the connection's room, leaving the previous one.
    async fn switch_room(ctx: &Context, state: &mut ConnectionState, identity: &Identity, code: &RoomCode) {
        if let Some(previous) = state.room.replace(code.clone()) {
            if &previous != code {
                ctx.coordinator.leave_room(identity, &previous, Some(state.id)).await;
            }
        }
    }

    /// Run cleanup loop.
    async fn run_cleanup_loop(ctx: Context) {
        let mut interval = interval(ctx.config.cleanup_interval);

        loop {
            interval.tick().await;

            let reaped = ctx.coordinator.reap_idle_rooms(ctx.config.idle_room_timeout).await;
            if reaped > 0 {
                info!("Reclaimed {} idle rooms", reaped);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get active room count.
    pub async fn session_count(&self) -> usize {
        self.ctx.coordinator.room_count().await
    }

    /// Room coordinator.
    pub fn coordinator(&self) -> &Arc<RoomCoordinator> {
        &self.ctx.coordinator
    }
}

fn room_info(request_id: u64, view: RoomView) -> RoomInfo {
    RoomInfo {
        request_id,
        code: view.code,
        game: view.game,
        members: view.members,
    }
}

fn room_error(request_id: Option<u64>, err: &RoomError) -> ServerMessage {
    if matches!(err, RoomError::Directory(_)) {
        error!("Room request failed: {}", err);
        return ServerMessage::error(request_id, err.error_code(), "Internal error");
    }
    ServerMessage::error(request_id, err.error_code(), err.to_string())
}

fn not_authenticated(request_id: Option<u64>) -> ServerMessage {
    ServerMessage::error(request_id, ErrorCode::NotAuthenticated, "Must authenticate first")
}

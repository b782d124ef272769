//! Room Coordinator
//!
//! Owns session lifecycle: creating rooms around a game, joining, leaving,
//! and reclaiming them. It is the only writer of the session directory and
//! the only source of membership broadcasts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::game::{
    GameGenerator, GameMode, GameRecord, GameRef, GameSource, GameStore, GameStoreError, NewGame,
};
use crate::network::hub::{ConnectionId, Subscriber, TopicHub};
use crate::network::protocol::{ErrorCode, MembershipUpdate, ServerMessage};
use crate::room::code::{CodeGenerator, RandomCodeGenerator, RoomCode};
use crate::room::directory::{DirectoryError, MemberUpdate, Session, SessionDirectory};
use crate::room::Identity;

/// Description used when inline content omits one.
pub const DEFAULT_DESCRIPTION: &str = "Two-player arcade match.";

/// Category used when inline content omits one.
pub const DEFAULT_CATEGORY: &str = "Two Player";

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Member limit per room. `None` means unlimited.
    pub max_members: Option<usize>,
    /// Candidate codes drawn before a create gives up.
    pub code_attempts: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_members: None,
            code_attempts: 8,
        }
    }
}

/// Room coordinator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    /// No active room with this code.
    #[error("Room {0} not found")]
    RoomNotFound(RoomCode),

    /// Member limit reached.
    #[error("Room {0} is full")]
    RoomFull(RoomCode),

    /// Every candidate code collided.
    #[error("No free room code after {attempts} attempts, try again")]
    CodeSpaceExhausted {
        /// Candidates drawn.
        attempts: usize,
    },

    /// The game could not be resolved or produced.
    #[error("Game content unavailable: {0}")]
    GameContentUnavailable(String),

    /// Inline or generated content is missing a required field.
    #[error("Game data is missing {0}")]
    IncompleteGameData(&'static str),

    /// The game is not written for two players.
    #[error("Game {0} is not a two-player game")]
    NotTwoPlayer(GameRef),

    /// Unexpected directory failure.
    #[error("Directory error: {0}")]
    Directory(DirectoryError),
}

impl RoomError {
    /// Wire error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::RoomFull(_) => ErrorCode::RoomFull,
            RoomError::CodeSpaceExhausted { .. } => ErrorCode::TryAgain,
            RoomError::GameContentUnavailable(_) => ErrorCode::GameUnavailable,
            RoomError::IncompleteGameData(_) => ErrorCode::InvalidInput,
            RoomError::NotTwoPlayer(_) => ErrorCode::NotTwoPlayer,
            RoomError::Directory(_) => ErrorCode::InternalError,
        }
    }
}

impl From<DirectoryError> for RoomError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(code) => RoomError::RoomNotFound(code),
            DirectoryError::Full(code) => RoomError::RoomFull(code),
            other => RoomError::Directory(other),
        }
    }
}

impl From<GameStoreError> for RoomError {
    fn from(err: GameStoreError) -> Self {
        RoomError::GameContentUnavailable(err.to_string())
    }
}

/// A room as seen by the member that created or joined it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    /// Room code.
    pub code: RoomCode,
    /// Game played in the room.
    pub game: GameRecord,
    /// Members in join order.
    pub members: Vec<Identity>,
    /// Membership revision.
    pub revision: u64,
}

/// Session lifecycle coordinator.
pub struct RoomCoordinator {
    directory: Arc<dyn SessionDirectory>,
    games: Arc<dyn GameStore>,
    generator: Option<Arc<dyn GameGenerator>>,
    codes: Arc<dyn CodeGenerator>,
    hub: Arc<TopicHub>,
    config: CoordinatorConfig,
}

impl RoomCoordinator {
    /// Create a coordinator with random codes and no content generator.
    pub fn new(
        directory: Arc<dyn SessionDirectory>,
        games: Arc<dyn GameStore>,
        hub: Arc<TopicHub>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            directory,
            games,
            generator: None,
            codes: Arc::new(RandomCodeGenerator),
            hub,
            config,
        }
    }

    /// Use `codes` to draw room codes.
    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    /// Enable generated game sources.
    pub fn with_game_generator(mut self, generator: Arc<dyn GameGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Topic hub the coordinator broadcasts through.
    pub fn hub(&self) -> &Arc<TopicHub> {
        &self.hub
    }

    /// Number of active rooms.
    pub async fn room_count(&self) -> usize {
        self.directory.len().await
    }

    /// Create a room around a two-player game with `identity` as its only
    /// member. The subscriber, if any, is attached to the new room's topic.
    #[instrument(skip_all, fields(identity = %identity))]
    pub async fn create_room(
        &self,
        identity: &Identity,
        source: GameSource,
        subscriber: Option<Subscriber>,
    ) -> Result<RoomView, RoomError> {
        let game = self.materialize(identity, source).await?;
        if game.mode != GameMode::TwoPlayer {
            return Err(RoomError::NotTwoPlayer(game.id));
        }

        let session = self.insert_session(identity, &game.id).await?;
        let code = session.code().clone();

        if let Some(subscriber) = subscriber {
            let connection = subscriber.connection;
            self.hub.subscribe(&code, subscriber);
            self.hub.send_to(&code, connection, membership_message(&session.snapshot()));
        }

        info!(code = %code, game = %game.id, "Room created");
        Ok(RoomView {
            code,
            game,
            members: session.members().to_vec(),
            revision: session.revision(),
        })
    }

    /// Join a room by code. Joining twice is harmless.
    #[instrument(skip_all, fields(identity = %identity, code = %code))]
    pub async fn join_room(
        &self,
        identity: &Identity,
        code: &RoomCode,
        subscriber: Option<Subscriber>,
    ) -> Result<RoomView, RoomError> {
        let session = self.directory.get(code).await?;
        let game = self.games.resolve(session.game_ref()).await?;

        let update = self.attach_member(identity, code, subscriber).await?;
        if update.changed {
            info!(members = update.members.len(), "Member joined");
        }

        Ok(RoomView {
            code: update.code,
            game,
            members: update.members,
            revision: update.revision,
        })
    }

    /// Attach a connection to a room it already belongs to, re-adding its
    /// identity if the seat was lost. Used after reconnecting.
    #[instrument(skip_all, fields(identity = %identity, code = %code))]
    pub async fn subscribe(
        &self,
        identity: &Identity,
        code: &RoomCode,
        subscriber: Subscriber,
    ) -> Result<MemberUpdate, RoomError> {
        self.attach_member(identity, code, Some(subscriber)).await
    }

    /// Leave a room. Leaving a room one is not in, or one that no longer
    /// exists, changes nothing. Returns whether membership changed.
    #[instrument(skip_all, fields(identity = %identity, code = %code))]
    pub async fn leave_room(
        &self,
        identity: &Identity,
        code: &RoomCode,
        connection: Option<ConnectionId>,
    ) -> bool {
        if let Some(connection) = connection {
            self.hub.unsubscribe(code, connection);
        }

        match self.directory.remove_member(code, identity).await {
            Ok(update) => self.settle_removal(update).await,
            Err(_) => false,
        }
    }

    /// Connection went away without leaving. The seat is kept if another
    /// connection of the same identity is still attached to the room.
    #[instrument(skip_all, fields(identity = %identity, code = %code))]
    pub async fn disconnect(
        &self,
        identity: &Identity,
        code: &RoomCode,
        connection: ConnectionId,
    ) -> bool {
        self.hub.unsubscribe(code, connection);

        let hub = &self.hub;
        let keep = || hub.has_identity(code, identity);
        match self.directory.remove_member_unless(code, identity, &keep).await {
            Ok(update) => self.settle_removal(update).await,
            Err(_) => false,
        }
    }

    /// Push the current membership of a room to every attached connection.
    pub async fn broadcast_membership(&self, code: &RoomCode) -> Result<usize, RoomError> {
        let session = self.directory.get(code).await?;
        Ok(self.publish_membership(&session.snapshot()))
    }

    /// Delete rooms idle for at least `idle` that no connection is attached
    /// to. Returns how many were deleted.
    pub async fn reap_idle_rooms(&self, idle: Duration) -> usize {
        let mut reaped = 0;
        for (code, last_activity) in self.directory.activity().await {
            if last_activity.elapsed() < idle || self.hub.subscriber_count(&code) > 0 {
                continue;
            }
            if self.directory.delete(&code).await {
                self.hub.drop_topic(&code);
                info!(code = %code, "Reclaimed idle room");
                reaped += 1;
            }
        }
        reaped
    }

    async fn insert_session(&self, owner: &Identity, game: &GameRef) -> Result<Session, RoomError> {
        let attempts = self.config.code_attempts.max(1);
        for attempt in 1..=attempts {
            let session = Session::new(self.codes.generate(), game.clone(), owner.clone());
            match self.directory.create(session.clone()).await {
                Ok(()) => return Ok(session),
                Err(DirectoryError::CodeCollision(code)) => {
                    debug!(code = %code, attempt, "Room code collision, redrawing");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(attempts, "Room code space exhausted");
        Err(RoomError::CodeSpaceExhausted { attempts })
    }

    async fn attach_member(
        &self,
        identity: &Identity,
        code: &RoomCode,
        subscriber: Option<Subscriber>,
    ) -> Result<MemberUpdate, RoomError> {
        // Attach before adding, so a concurrent disconnect of an older
        // connection of this identity sees the new one and keeps the seat.
        let connection = subscriber.as_ref().map(|s| s.connection);
        if let Some(subscriber) = subscriber {
            self.hub.subscribe(code, subscriber);
        }

        let update = match self
            .directory
            .add_member(code, identity, self.config.max_members)
            .await
        {
            Ok(update) => update,
            Err(e) => {
                if let Some(connection) = connection {
                    self.hub.unsubscribe(code, connection);
                }
                return Err(e.into());
            }
        };

        if update.changed {
            self.publish_membership(&update);
        } else if let Some(connection) = connection {
            self.hub.send_to(code, connection, membership_message(&update));
        }
        Ok(update)
    }

    async fn settle_removal(&self, update: MemberUpdate) -> bool {
        if !update.changed {
            return false;
        }

        if update.members.is_empty() {
            if self.directory.delete_if_empty(&update.code).await {
                self.hub.drop_topic(&update.code);
                info!(code = %update.code, "Room closed");
            }
        } else {
            self.publish_membership(&update);
        }
        true
    }

    fn publish_membership(&self, update: &MemberUpdate) -> usize {
        self.hub.publish(&update.code, &membership_message(update), None)
    }

    async fn materialize(
        &self,
        identity: &Identity,
        source: GameSource,
    ) -> Result<GameRecord, RoomError> {
        match source {
            GameSource::Existing { game_id } => Ok(self.games.resolve(&game_id).await?),
            GameSource::Inline(game) => {
                if game.title.trim().is_empty() {
                    return Err(RoomError::IncompleteGameData("title"));
                }
                if game.html_content.trim().is_empty() {
                    return Err(RoomError::IncompleteGameData("html_content"));
                }
                let record = self
                    .games
                    .persist(NewGame {
                        title: game.title,
                        description: non_blank(game.description, DEFAULT_DESCRIPTION),
                        html_content: game.html_content,
                        category: non_blank(game.category, DEFAULT_CATEGORY),
                        author: identity.to_string(),
                        mode: GameMode::TwoPlayer,
                    })
                    .await?;
                Ok(record)
            }
            GameSource::Generated { prompt } => {
                if prompt.trim().is_empty() {
                    return Err(RoomError::IncompleteGameData("prompt"));
                }
                let generator = self.generator.as_ref().ok_or_else(|| {
                    RoomError::GameContentUnavailable("no game generator configured".into())
                })?;
                let generated = generator.generate(&prompt).await?;
                if generated.html_content.trim().is_empty() {
                    return Err(RoomError::GameContentUnavailable(
                        "generator returned no content".into(),
                    ));
                }
                let record = self
                    .games
                    .persist(NewGame {
                        title: generated.title,
                        description: generated.description,
                        html_content: generated.html_content,
                        category: DEFAULT_CATEGORY.to_string(),
                        author: identity.to_string(),
                        mode: GameMode::TwoPlayer,
                    })
                    .await?;
                Ok(record)
            }
        }
    }
}

fn non_blank(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn membership_message(update: &MemberUpdate) -> ServerMessage {
    ServerMessage::MembershipUpdate(MembershipUpdate {
        code: update.code.clone(),
        members: update.members.clone(),
        revision: update.revision,
    })
}

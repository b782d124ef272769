//! Game Content
//!
//! Game records that rooms are built around, and the collaborator traits
//! used to store and generate them. Storage technology is not this crate's
//! concern; [`MemoryGameStore`] is enough for a single process.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Reference to a stored game.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameRef(String);

impl GameRef {
    /// Fresh random reference.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Reference as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GameRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for GameRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for GameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How many people a game is written for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GameMode {
    /// Single player.
    #[default]
    Solo,
    /// Two players on one keyboard layout (WASD + arrows).
    TwoPlayer,
}

/// A stored game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// Reference.
    pub id: GameRef,
    /// Title.
    pub title: String,
    /// Short description.
    pub description: String,
    /// Self-contained HTML document.
    pub html_content: String,
    /// Gallery category.
    pub category: String,
    /// Display name of the author.
    pub author: String,
    /// Player mode.
    pub mode: GameMode,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A game about to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGame {
    /// Title.
    pub title: String,
    /// Short description.
    pub description: String,
    /// Self-contained HTML document.
    pub html_content: String,
    /// Gallery category.
    pub category: String,
    /// Display name of the author.
    pub author: String,
    /// Player mode.
    pub mode: GameMode,
}

/// Output of the content generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedGame {
    /// Title.
    pub title: String,
    /// Short description.
    pub description: String,
    /// Self-contained HTML document.
    pub html_content: String,
}

/// Game content supplied inline with a create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineGame {
    /// Title.
    pub title: String,
    /// Short description.
    #[serde(default)]
    pub description: Option<String>,
    /// Self-contained HTML document.
    pub html_content: String,
    /// Gallery category.
    #[serde(default)]
    pub category: Option<String>,
}

/// Where the game for a new room comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GameSource {
    /// A game that is already stored.
    Existing {
        /// Reference to the stored game.
        game_id: GameRef,
    },
    /// Content to store as part of creating the room.
    Inline(InlineGame),
    /// Content to generate from a prompt and store.
    Generated {
        /// Free-form description of the game.
        prompt: String,
    },
}

/// Content collaborator errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GameStoreError {
    /// No such game.
    #[error("Game {0} not found")]
    NotFound(GameRef),

    /// Backend failure.
    #[error("Game content unavailable: {0}")]
    Unavailable(String),
}

/// Durable game storage.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Load a stored game.
    async fn resolve(&self, game_ref: &GameRef) -> Result<GameRecord, GameStoreError>;

    /// Store a game and return the stored record.
    async fn persist(&self, game: NewGame) -> Result<GameRecord, GameStoreError>;
}

/// Game content generator (AI-backed in production).
#[async_trait]
pub trait GameGenerator: Send + Sync {
    /// Produce a playable game for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<GeneratedGame, GameStoreError>;
}

/// In-memory game store.
#[derive(Default)]
pub struct MemoryGameStore {
    games: RwLock<BTreeMap<GameRef, GameRecord>>,
}

impl MemoryGameStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored games.
    pub async fn len(&self) -> usize {
        self.games.read().await.len()
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn resolve(&self, game_ref: &GameRef) -> Result<GameRecord, GameStoreError> {
        let games = self.games.read().await;
        games
            .get(game_ref)
            .cloned()
            .ok_or_else(|| GameStoreError::NotFound(game_ref.clone()))
    }

    async fn persist(&self, game: NewGame) -> Result<GameRecord, GameStoreError> {
        let record = GameRecord {
            id: GameRef::new_v4(),
            title: game.title,
            description: game.description,
            html_content: game.html_content,
            category: game.category,
            author: game.author,
            mode: game.mode,
            created_at: Utc::now(),
        };

        let mut games = self.games.write().await;
        games.insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_game(mode: GameMode) -> NewGame {
        NewGame {
            title: "Pixel Pong Duel".into(),
            description: "Two paddles, one ball.".into(),
            html_content: "<html></html>".into(),
            category: "Two Player".into(),
            author: "alice".into(),
            mode,
        }
    }

    #[tokio::test]
    async fn test_persist_then_resolve() {
        let store = MemoryGameStore::new();
        let stored = store.persist(new_game(GameMode::TwoPlayer)).await.unwrap();
        assert_eq!(store.len().await, 1);

        let resolved = store.resolve(&stored.id).await.unwrap();
        assert_eq!(resolved, stored);
        assert_eq!(resolved.mode, GameMode::TwoPlayer);
    }

    #[tokio::test]
    async fn test_resolve_unknown() {
        let store = MemoryGameStore::new();
        let result = store.resolve(&GameRef::from("missing")).await;
        assert!(matches!(result, Err(GameStoreError::NotFound(_))));
    }

    #[test]
    fn test_game_source_wire_shape() {
        let existing: GameSource =
            serde_json::from_str(r#"{"kind":"existing","game_id":"g-1"}"#).unwrap();
        assert_eq!(existing, GameSource::Existing { game_id: GameRef::from("g-1") });

        let inline: GameSource = serde_json::from_str(
            r#"{"kind":"inline","title":"Duel","html_content":"<html></html>"}"#,
        )
        .unwrap();
        match inline {
            GameSource::Inline(game) => {
                assert_eq!(game.title, "Duel");
                assert!(game.description.is_none());
                assert!(game.category.is_none());
            }
            other => panic!("Wrong source: {:?}", other),
        }
    }

    #[test]
    fn test_mode_serializes_kebab_case() {
        assert_eq!(serde_json::to_string(&GameMode::TwoPlayer).unwrap(), "\"two-player\"");
        assert_eq!(serde_json::to_string(&GameMode::Solo).unwrap(), "\"solo\"");
    }
}

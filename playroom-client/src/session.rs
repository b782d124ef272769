//! Two-Player Session
//!
//! Glue between the connection, the readiness gate, the input relay and
//! the game. Feed it connection events and local key events; it mounts the
//! game, tells you what to send, and injects what the other player sent.

use playroom::network::InputEvent;
use playroom::{Identity, Role, RoomCode};
use tracing::{debug, info};

use crate::connection::ClientEvent;
use crate::gate::{GateState, GateTransition, ReadinessGate};
use crate::relay::{GameContext, InputRelay, KeyEvent};

/// One player's view of a two-player room.
pub struct TwoPlayerSession<G: GameContext> {
    me: Identity,
    gate: ReadinessGate,
    relay: Option<InputRelay>,
    game: G,
}

impl<G: GameContext> TwoPlayerSession<G> {
    /// Session for `me` in room `code`, waiting for the first broadcast.
    pub fn new(me: Identity, code: RoomCode, game: G) -> Self {
        Self {
            me,
            gate: ReadinessGate::new(code),
            relay: None,
            game,
        }
    }

    /// Room code.
    pub fn code(&self) -> &RoomCode {
        self.gate.code()
    }

    /// Waiting or active.
    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    /// This player's role while the game is active.
    pub fn role(&self) -> Option<Role> {
        self.relay.as_ref().map(InputRelay::role)
    }

    /// The game.
    pub fn game(&self) -> &G {
        &self.game
    }

    /// The game, mutably.
    pub fn game_mut(&mut self) -> &mut G {
        &mut self.game
    }

    /// Apply a connection event. Returns releases to send when the game is
    /// torn down, or this player's role changes, with keys still held.
    pub fn on_event(&mut self, event: &ClientEvent) -> Vec<InputEvent> {
        match event {
            ClientEvent::Membership(update) => match self.gate.apply(update) {
                Some(GateTransition::Mount) => {
                    self.mount();
                    Vec::new()
                }
                Some(GateTransition::Unmount) => self.unmount(),
                None => self.refresh_role(),
            },
            ClientEvent::Input { code, event } => {
                if code == self.gate.code() {
                    if let Some(relay) = &self.relay {
                        relay.handle_remote(event, &mut self.game);
                    }
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    /// Handle a local key event. Returns the event to send to the room.
    pub fn on_local_key(&mut self, event: &KeyEvent) -> Option<InputEvent> {
        let relay = self.relay.as_mut()?;
        relay.handle_local(event, &mut self.game)
    }

    fn mount(&mut self) {
        self.relay = self.gate.role_of(&self.me).map(InputRelay::new);
        info!(code = %self.gate.code(), role = ?self.role(), "Both players present, starting game");
        self.game.mount();
    }

    fn unmount(&mut self) -> Vec<InputEvent> {
        let releases = match self.relay.take() {
            Some(mut relay) => relay.release_all(&mut self.game),
            None => Vec::new(),
        };
        info!(code = %self.gate.code(), "Waiting for the other player");
        self.game.unmount();
        releases
    }

    fn refresh_role(&mut self) -> Vec<InputEvent> {
        if !self.gate.is_active() {
            return Vec::new();
        }
        let role = self.gate.role_of(&self.me);
        if role == self.role() {
            return Vec::new();
        }
        debug!(?role, "Role changed");
        // Keys held under the old role must not stay down in either game.
        let releases = match self.relay.take() {
            Some(mut relay) => relay.release_all(&mut self.game),
            None => Vec::new(),
        };
        self.relay = role.map(InputRelay::new);
        releases
    }
}

//! Input Relay
//!
//! Turns local key events into relayed input and feeds relayed input back
//! into the local game.
//!
//! Local keys go through four steps: filter to control keys, drop OS
//! auto-repeat, map to a [`Control`], and re-express in this player's scheme.
//! The result is both returned (for the transport) and dispatched into the
//! local game directly. Events the relay dispatches are marked synthetic and
//! never re-enter the relay.

use std::collections::HashSet;

use playroom::network::{InputEvent, KeyKind};
use playroom::Role;
use tracing::trace;

use crate::keys::{canonical_event, control_for_key, Control};

/// A key event as seen by the game context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Press or release.
    pub kind: KeyKind,
    /// Key value.
    pub key: String,
    /// Physical key code.
    pub code: String,
    /// Set by the OS on auto-repeat presses.
    pub repeat: bool,
    /// Set on events dispatched by the relay rather than the keyboard.
    pub synthetic: bool,
}

impl KeyEvent {
    /// Physical key press.
    pub fn press(key: &str, code: &str) -> Self {
        Self::physical(KeyKind::Press, key, code)
    }

    /// Physical key release.
    pub fn release(key: &str, code: &str) -> Self {
        Self::physical(KeyKind::Release, key, code)
    }

    /// Same press marked as an OS auto-repeat.
    pub fn repeated(mut self) -> Self {
        self.repeat = true;
        self
    }

    fn physical(kind: KeyKind, key: &str, code: &str) -> Self {
        Self {
            kind,
            key: key.to_string(),
            code: code.to_string(),
            repeat: false,
            synthetic: false,
        }
    }

    fn synthesized(event: &InputEvent) -> Self {
        Self {
            kind: event.kind,
            key: event.key.clone(),
            code: event.code.clone(),
            repeat: false,
            synthetic: true,
        }
    }
}

/// The running game a relay feeds.
pub trait GameContext {
    /// Deliver a key event to the game.
    fn dispatch(&mut self, event: KeyEvent);

    /// Game became active.
    fn mount(&mut self) {}

    /// Game stopped being active.
    fn unmount(&mut self) {}
}

/// Input relay for one player role.
#[derive(Debug, Clone)]
pub struct InputRelay {
    role: Role,
    held: HashSet<Control>,
}

impl InputRelay {
    /// Relay for a player in `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            held: HashSet::new(),
        }
    }

    /// Role the relay remaps into.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether `control` is currently held.
    pub fn is_held(&self, control: Control) -> bool {
        self.held.contains(&control)
    }

    /// Handle a local key event. Returns the event to send to the room, after
    /// dispatching the same event into `game`.
    pub fn handle_local(&mut self, event: &KeyEvent, game: &mut dyn GameContext) -> Option<InputEvent> {
        if event.synthetic {
            return None;
        }
        let control = control_for_key(&event.key)?;

        let fresh = match event.kind {
            KeyKind::Press => !event.repeat && self.held.insert(control),
            KeyKind::Release => self.held.remove(&control),
        };
        if !fresh {
            trace!(key = %event.key, "Suppressed repeated key transition");
            return None;
        }

        let out = canonical_event(self.role, control, event.kind);
        game.dispatch(KeyEvent::synthesized(&out));
        Some(out)
    }

    /// Dispatch an event relayed from the other player.
    pub fn handle_remote(&self, event: &InputEvent, game: &mut dyn GameContext) {
        game.dispatch(KeyEvent::synthesized(event));
    }

    /// Release every held control. Returns the releases to send.
    pub fn release_all(&mut self, game: &mut dyn GameContext) -> Vec<InputEvent> {
        let mut held: Vec<Control> = self.held.drain().collect();
        held.sort_by_key(|c| Control::ALL.iter().position(|a| a == c));

        held.into_iter()
            .map(|control| {
                let out = canonical_event(self.role, control, KeyKind::Release);
                game.dispatch(KeyEvent::synthesized(&out));
                out
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records what the game received.
    #[derive(Default)]
    struct Recorder {
        events: Vec<KeyEvent>,
    }

    impl GameContext for Recorder {
        fn dispatch(&mut self, event: KeyEvent) {
            self.events.push(event);
        }
    }

    #[test]
    fn test_auto_repeat_yields_one_press_one_release() {
        let mut relay = InputRelay::new(Role::PlayerOne);
        let mut game = Recorder::default();

        let mut sent = Vec::new();
        sent.extend(relay.handle_local(&KeyEvent::press("w", "KeyW"), &mut game));
        for _ in 0..5 {
            sent.extend(relay.handle_local(&KeyEvent::press("w", "KeyW").repeated(), &mut game));
        }
        // Some platforms repeat without the flag.
        sent.extend(relay.handle_local(&KeyEvent::press("w", "KeyW"), &mut game));
        sent.extend(relay.handle_local(&KeyEvent::release("w", "KeyW"), &mut game));

        let kinds: Vec<KeyKind> = sent.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![KeyKind::Press, KeyKind::Release]);
        assert_eq!(game.events.len(), 2);
        assert!(game.events.iter().all(|e| e.synthetic));
    }

    #[test]
    fn test_release_of_unheld_key_dropped() {
        let mut relay = InputRelay::new(Role::PlayerOne);
        let mut game = Recorder::default();
        assert!(relay.handle_local(&KeyEvent::release("d", "KeyD"), &mut game).is_none());
        assert!(game.events.is_empty());
    }

    #[test]
    fn test_non_control_keys_ignored() {
        let mut relay = InputRelay::new(Role::PlayerTwo);
        let mut game = Recorder::default();
        assert!(relay.handle_local(&KeyEvent::press("q", "KeyQ"), &mut game).is_none());
        assert!(relay.handle_local(&KeyEvent::press("Enter", "Enter"), &mut game).is_none());
        assert!(game.events.is_empty());
    }

    #[test]
    fn test_player_two_remaps_wasd_to_arrows() {
        let mut relay = InputRelay::new(Role::PlayerTwo);
        let mut game = Recorder::default();

        let out = relay.handle_local(&KeyEvent::press("W", "KeyW"), &mut game).unwrap();
        assert_eq!((out.key.as_str(), out.code.as_str()), ("ArrowUp", "ArrowUp"));
        assert_eq!(game.events[0].key, "ArrowUp");

        let out = relay.handle_local(&KeyEvent::press(" ", "Space"), &mut game).unwrap();
        assert_eq!((out.key.as_str(), out.code.as_str()), ("Shift", "ShiftLeft"));
    }

    #[test]
    fn test_synthetic_events_not_rebroadcast() {
        let mut relay = InputRelay::new(Role::PlayerTwo);
        let mut game = Recorder::default();

        let remote = canonical_event(Role::PlayerOne, Control::Up, KeyKind::Press);
        relay.handle_remote(&remote, &mut game);
        let echoed = game.events[0].clone();
        assert!(echoed.synthetic);
        assert_eq!(echoed.key, "w");

        // The game hands its own synthetic event back to the relay.
        assert!(relay.handle_local(&echoed, &mut game).is_none());
        assert!(!relay.is_held(Control::Up));
    }

    #[test]
    fn test_release_all() {
        let mut relay = InputRelay::new(Role::PlayerOne);
        let mut game = Recorder::default();
        relay.handle_local(&KeyEvent::press("d", "KeyD"), &mut game);
        relay.handle_local(&KeyEvent::press("w", "KeyW"), &mut game);

        let released = relay.release_all(&mut game);
        let keys: Vec<&str> = released.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["w", "d"]);
        assert!(released.iter().all(|e| e.kind == KeyKind::Release));
        assert!(!relay.is_held(Control::Up));
    }
}

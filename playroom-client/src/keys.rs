//! Control Keys
//!
//! Both players share one keyboard layout: player 1 plays on WASD + Space,
//! player 2 on the arrow keys + Shift. Games listen for both. A relayed key
//! is re-expressed in the sender's own scheme, so the receiving game sees
//! exactly what it would have seen from a local player in that role.

use playroom::network::{InputEvent, KeyKind};
use playroom::Role;

/// Scheme-independent game control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Move up.
    Up,
    /// Move down.
    Down,
    /// Move left.
    Left,
    /// Move right.
    Right,
    /// Primary action (dash, bash, fire).
    Action,
}

impl Control {
    /// Every control.
    pub const ALL: [Control; 5] = [
        Control::Up,
        Control::Down,
        Control::Left,
        Control::Right,
        Control::Action,
    ];
}

/// Control bound to a key value, from either scheme.
pub fn control_for_key(key: &str) -> Option<Control> {
    match key {
        "w" | "W" | "ArrowUp" => Some(Control::Up),
        "s" | "S" | "ArrowDown" => Some(Control::Down),
        "a" | "A" | "ArrowLeft" => Some(Control::Left),
        "d" | "D" | "ArrowRight" => Some(Control::Right),
        " " | "Space" | "Spacebar" | "Shift" | "ShiftLeft" | "ShiftRight" => Some(Control::Action),
        _ => None,
    }
}

/// Whether the relay cares about this key at all.
pub fn is_control_key(key: &str) -> bool {
    control_for_key(key).is_some()
}

/// `(key, code)` a local player in `role` produces for `control`.
pub fn canonical_key(role: Role, control: Control) -> (&'static str, &'static str) {
    match (role, control) {
        (Role::PlayerOne, Control::Up) => ("w", "KeyW"),
        (Role::PlayerOne, Control::Down) => ("s", "KeyS"),
        (Role::PlayerOne, Control::Left) => ("a", "KeyA"),
        (Role::PlayerOne, Control::Right) => ("d", "KeyD"),
        (Role::PlayerOne, Control::Action) => (" ", "Space"),
        (Role::PlayerTwo, Control::Up) => ("ArrowUp", "ArrowUp"),
        (Role::PlayerTwo, Control::Down) => ("ArrowDown", "ArrowDown"),
        (Role::PlayerTwo, Control::Left) => ("ArrowLeft", "ArrowLeft"),
        (Role::PlayerTwo, Control::Right) => ("ArrowRight", "ArrowRight"),
        (Role::PlayerTwo, Control::Action) => ("Shift", "ShiftLeft"),
    }
}

/// Wire event for `control` in `role`'s scheme.
pub fn canonical_event(role: Role, control: Control, kind: KeyKind) -> InputEvent {
    let (key, code) = canonical_key(role, control);
    InputEvent {
        kind,
        key: key.to_string(),
        code: code.to_string(),
    }
}

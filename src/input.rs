//! Scripted input state
//!
//! Actions produce [`Event`]s; the render loop consumes them through the
//! host's polling calls, strictly first in, first out. Alongside the queue
//! the state tracks which keys are down and where the cursor last moved.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::error::{HarnessError, Result};

/// Key name carried by motion events
pub const MOVE_KEY: &str = "Motion";

/// Mouse button key names
pub const LMB: &str = "LMB";
pub const MMB: &str = "MMB";
pub const RMB: &str = "RMB";

/// Whether a key name refers to a mouse button
pub fn is_mouse_button(key: &str) -> bool {
    matches!(key, LMB | MMB | RMB)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTag {
    Press,
    Release,
    Motion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Modifier {
    Shift,
    Control,
    Alt,
}

impl FromStr for Modifier {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "shift" => Ok(Modifier::Shift),
            "control" => Ok(Modifier::Control),
            "alt" => Ok(Modifier::Alt),
            _ => Err(HarnessError::InvalidModifier(s.to_string())),
        }
    }
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Modifier::Shift => "Shift",
            Modifier::Control => "Control",
            Modifier::Alt => "Alt",
        };
        f.write_str(name)
    }
}

/// Queued synthetic input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub tag: EventTag,
    pub key: String,
    pub modifiers: BTreeSet<Modifier>,
}

/// Event as handed to the render loop, stamped with the cursor position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolledEvent {
    pub tag: EventTag,
    pub key: String,
    pub modifiers: BTreeSet<Modifier>,
    pub position: (f64, f64),
}

/// Per-test input state shared by the action layer and the injection shim
#[derive(Debug, Clone, Default)]
pub struct InputState {
    queue: VecDeque<Event>,
    pressed: BTreeSet<String>,
    cursor: (f64, f64),
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a press and mark the key down
    pub fn press(&mut self, key: &str, modifiers: BTreeSet<Modifier>) {
        self.queue.push_back(Event {
            tag: EventTag::Press,
            key: key.to_string(),
            modifiers,
        });
        self.pressed.insert(key.to_string());
    }

    /// Queue a release and mark the key up.
    ///
    /// Releasing a key that is not down is a protocol violation; nothing is
    /// queued in that case.
    pub fn release(&mut self, key: &str, modifiers: BTreeSet<Modifier>) -> Result<()> {
        if !self.pressed.remove(key) {
            return Err(HarnessError::UnpressedKeyRelease(key.to_string()));
        }
        self.queue.push_back(Event {
            tag: EventTag::Release,
            key: key.to_string(),
            modifiers,
        });
        Ok(())
    }

    /// Move the cursor and queue a motion event
    pub fn move_to(&mut self, position: (f64, f64)) -> Result<()> {
        validate_position(position)?;
        self.cursor = position;
        self.queue.push_back(Event {
            tag: EventTag::Motion,
            key: MOVE_KEY.to_string(),
            modifiers: BTreeSet::new(),
        });
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pop the oldest event, stamped with the current cursor position
    pub fn poll(&mut self) -> Result<PolledEvent> {
        let event = self.queue.pop_front().ok_or(HarnessError::EmptyEventQueue)?;
        Ok(PolledEvent {
            tag: event.tag,
            key: event.key,
            modifiers: event.modifiers,
            position: self.cursor,
        })
    }

    /// True if any of `keys` is down
    pub fn is_pressed(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.pressed.contains(*k))
    }

    pub fn pressed_keys(&self) -> impl Iterator<Item = &str> {
        self.pressed.iter().map(String::as_str)
    }

    pub fn cursor(&self) -> (f64, f64) {
        self.cursor
    }

    /// Back to the initial empty state
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pressed.clear();
        self.cursor = (0.0, 0.0);
    }
}

/// Cursor positions are normalized to [0, 1] on both axes
pub fn validate_position(position: (f64, f64)) -> Result<()> {
    let (x, y) = position;
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        return Err(HarnessError::InvalidPosition(format!(
            "({}, {}) outside [0, 1] x [0, 1]",
            x, y
        )));
    }
    Ok(())
}

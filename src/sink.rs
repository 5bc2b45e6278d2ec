//! Motion sink: the pointer/wheel mover the accelerators drive
//!
//! Concrete backends (uinput, test recorders) implement [`MotionSink`].
//! Calls are fire-and-forget from the caller's point of view: the
//! accelerators log failures and carry on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Mouse buttons the numpad can click or hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub const ALL: [MouseButton; 3] = [MouseButton::Left, MouseButton::Right, MouseButton::Middle];

    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from a motion sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to emit event: {0}")]
    Emit(#[source] std::io::Error),
    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Consumer of relative pointer motion, wheel motion and button events
///
/// Movement uses screen coordinates (y grows downward). Scroll uses wheel
/// coordinates: `dy > 0` scrolls up, `dx > 0` scrolls right.
pub trait MotionSink: Send + Sync {
    /// Move the pointer by a relative offset
    fn move_by(&self, dx: i32, dy: i32) -> Result<(), SinkError>;

    /// Turn the wheels by a relative amount
    fn scroll(&self, dx: i32, dy: i32) -> Result<(), SinkError>;

    fn press(&self, button: MouseButton) -> Result<(), SinkError>;

    fn release(&self, button: MouseButton) -> Result<(), SinkError>;

    /// Press and release
    fn click(&self, button: MouseButton) -> Result<(), SinkError> {
        self.press(button)?;
        self.release(button)
    }
}

impl<T: MotionSink + ?Sized> MotionSink for Arc<T> {
    fn move_by(&self, dx: i32, dy: i32) -> Result<(), SinkError> {
        (**self).move_by(dx, dy)
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<(), SinkError> {
        (**self).scroll(dx, dy)
    }

    fn press(&self, button: MouseButton) -> Result<(), SinkError> {
        (**self).press(button)
    }

    fn release(&self, button: MouseButton) -> Result<(), SinkError> {
        (**self).release(button)
    }

    fn click(&self, button: MouseButton) -> Result<(), SinkError> {
        (**self).click(button)
    }
}

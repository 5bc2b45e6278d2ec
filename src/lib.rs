//! Numpad Mouse
//!
//! Turns held numpad keys into accelerating pointer movement and wheel
//! scrolling on Linux, with a bounded undo history for pointer moves.

pub mod accelerator;
pub mod capture;
pub mod config;
pub mod curve;
pub mod direction;
pub mod dispatch;
pub mod sink;
pub mod testing;
pub mod uinput;
pub mod undo;

pub use accelerator::{DirectionalAccelerator, MotionKind, CONFIG_REFRESH_TICKS};
pub use config::{Config, ConfigError, ConfigProvider, ConfigStore, MotionParameters};
pub use curve::AccelerationCurve;
pub use direction::{Direction, DirectionError, DirectionSet};
pub use dispatch::{Action, HotkeyDispatcher, Keymap};
pub use sink::{MotionSink, MouseButton, SinkError};
pub use uinput::{UinputError, UinputMouse};
pub use undo::{UndoEntry, UndoLedger};

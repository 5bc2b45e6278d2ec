//! Configuration for movement, scroll, undo and hotkeys
//!
//! Stored as TOML. Every field has a serde default, so a partial file (or an
//! older file missing a newer section) merges with the built-in defaults.
//! The accelerators never parse config themselves; they read typed
//! [`MotionParameters`] snapshots from a [`ConfigProvider`].

use crate::curve::{self, AccelerationCurve};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shortest tick period the loops will sleep for
const MIN_TICK_MS: u64 = 1;

/// Errors from loading or saving the config file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Cursor movement settings (`[movement]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementSettings {
    /// Pixels per tick at multiplier 1.0
    #[serde(default = "default_base_speed")]
    pub base_speed: i32,
    /// Per-tick acceleration factor
    #[serde(default = "default_movement_rate")]
    pub acceleration_rate: f64,
    /// Pixels per tick at full speed
    #[serde(default = "default_max_speed")]
    pub max_speed: i32,
    /// Milliseconds between ticks
    #[serde(default = "default_move_delay")]
    pub move_delay: u64,
    #[serde(default)]
    pub curve: AccelerationCurve,
}

fn default_base_speed() -> i32 {
    5
}
fn default_movement_rate() -> f64 {
    1.08
}
fn default_max_speed() -> i32 {
    40
}
fn default_move_delay() -> u64 {
    20
}

impl Default for MovementSettings {
    fn default() -> Self {
        Self {
            base_speed: default_base_speed(),
            acceleration_rate: default_movement_rate(),
            max_speed: default_max_speed(),
            move_delay: default_move_delay(),
            curve: AccelerationCurve::default(),
        }
    }
}

impl MovementSettings {
    pub fn parameters(&self) -> MotionParameters {
        MotionParameters::new(
            self.base_speed,
            self.acceleration_rate,
            self.max_speed,
            self.curve,
            self.move_delay,
        )
    }
}

/// Wheel scrolling settings (`[scroll]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollSettings {
    /// Wheel units per tick at multiplier 1.0
    #[serde(default = "default_scroll_step")]
    pub step: i32,
    #[serde(default = "default_scroll_rate")]
    pub acceleration_rate: f64,
    #[serde(default = "default_scroll_max_speed")]
    pub max_speed: i32,
    /// Milliseconds between ticks
    #[serde(default = "default_scroll_delay")]
    pub delay: u64,
    #[serde(default)]
    pub curve: AccelerationCurve,
}

fn default_scroll_step() -> i32 {
    3
}
fn default_scroll_rate() -> f64 {
    1.1
}
fn default_scroll_max_speed() -> i32 {
    10
}
fn default_scroll_delay() -> u64 {
    30
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            step: default_scroll_step(),
            acceleration_rate: default_scroll_rate(),
            max_speed: default_scroll_max_speed(),
            delay: default_scroll_delay(),
            curve: AccelerationCurve::default(),
        }
    }
}

impl ScrollSettings {
    pub fn parameters(&self) -> MotionParameters {
        MotionParameters::new(
            self.step,
            self.acceleration_rate,
            self.max_speed,
            self.curve,
            self.delay,
        )
    }
}

/// Undo history settings (`[undo]`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoSettings {
    /// Maximum number of movement deltas remembered
    #[serde(default = "default_max_levels")]
    pub max_levels: usize,
}

fn default_max_levels() -> usize {
    10
}

impl Default for UndoSettings {
    fn default() -> Self {
        Self {
            max_levels: default_max_levels(),
        }
    }
}

/// Evdev keycodes for each action (`[hotkeys]`)
///
/// Defaults follow the numpad layout: 8/2/4/6 move, 7/1/9/3 scroll,
/// 5/0/Enter click, `.` holds the left button, `+` toggles, `/` undoes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeySettings {
    #[serde(default = "default_toggle_mode")]
    pub toggle_mode: u16,
    #[serde(default = "default_undo_key")]
    pub undo: u16,
    #[serde(default = "default_left_click")]
    pub left_click: u16,
    #[serde(default = "default_right_click")]
    pub right_click: u16,
    #[serde(default = "default_middle_click")]
    pub middle_click: u16,
    #[serde(default = "default_hold_left")]
    pub hold_left: u16,
    #[serde(default = "default_move_up")]
    pub move_up: u16,
    #[serde(default = "default_move_down")]
    pub move_down: u16,
    #[serde(default = "default_move_left")]
    pub move_left: u16,
    #[serde(default = "default_move_right")]
    pub move_right: u16,
    #[serde(default = "default_scroll_up")]
    pub scroll_up: u16,
    #[serde(default = "default_scroll_down")]
    pub scroll_down: u16,
    #[serde(default = "default_scroll_left")]
    pub scroll_left: u16,
    #[serde(default = "default_scroll_right")]
    pub scroll_right: u16,
}

// KEY_KPPLUS
fn default_toggle_mode() -> u16 {
    78
}
// KEY_KPSLASH
fn default_undo_key() -> u16 {
    98
}
// KEY_KP5
fn default_left_click() -> u16 {
    76
}
// KEY_KP0
fn default_right_click() -> u16 {
    82
}
// KEY_KPENTER
fn default_middle_click() -> u16 {
    96
}
// KEY_KPDOT
fn default_hold_left() -> u16 {
    83
}
// KEY_KP8
fn default_move_up() -> u16 {
    72
}
// KEY_KP2
fn default_move_down() -> u16 {
    80
}
// KEY_KP4
fn default_move_left() -> u16 {
    75
}
// KEY_KP6
fn default_move_right() -> u16 {
    77
}
// KEY_KP7
fn default_scroll_up() -> u16 {
    71
}
// KEY_KP1
fn default_scroll_down() -> u16 {
    79
}
// KEY_KP3
fn default_scroll_left() -> u16 {
    81
}
// KEY_KP9
fn default_scroll_right() -> u16 {
    73
}

impl Default for HotkeySettings {
    fn default() -> Self {
        Self {
            toggle_mode: default_toggle_mode(),
            undo: default_undo_key(),
            left_click: default_left_click(),
            right_click: default_right_click(),
            middle_click: default_middle_click(),
            hold_left: default_hold_left(),
            move_up: default_move_up(),
            move_down: default_move_down(),
            move_left: default_move_left(),
            move_right: default_move_right(),
            scroll_up: default_scroll_up(),
            scroll_down: default_scroll_down(),
            scroll_left: default_scroll_left(),
            scroll_right: default_scroll_right(),
        }
    }
}

/// Complete numpad-mouse configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub movement: MovementSettings,
    #[serde(default)]
    pub scroll: ScrollSettings,
    #[serde(default)]
    pub undo: UndoSettings,
    #[serde(default)]
    pub hotkeys: HotkeySettings,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("numpad-mouse")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io_err)?;
        Ok(())
    }
}

/// Typed per-tick motion settings, shared by movement and scroll
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionParameters {
    /// Step at multiplier 1.0 (pixels or wheel units)
    pub base_step: i32,
    pub acceleration_rate: f64,
    /// Step at full speed
    pub max_step: i32,
    pub curve: AccelerationCurve,
    pub tick_period: Duration,
}

impl MotionParameters {
    pub fn new(
        base_step: i32,
        acceleration_rate: f64,
        max_step: i32,
        curve: AccelerationCurve,
        tick_ms: u64,
    ) -> Self {
        // NaN/inf from a hand-edited file would poison the multiplier forever
        let acceleration_rate = if acceleration_rate.is_finite() {
            acceleration_rate
        } else {
            1.0
        };
        Self {
            base_step,
            acceleration_rate,
            max_step,
            curve,
            tick_period: Duration::from_millis(tick_ms.max(MIN_TICK_MS)),
        }
    }

    /// Ceiling for the speed multiplier (`max_step / base_step`, at least 1.0)
    pub fn max_multiplier(&self) -> f64 {
        curve::max_multiplier(self.base_step, self.max_step)
    }

    /// Step size for a given multiplier
    pub fn step_at(&self, multiplier: f64) -> i32 {
        (self.base_step as f64 * multiplier).round() as i32
    }

    /// Multiplier for the tick after one at `multiplier`
    pub fn advance(&self, multiplier: f64) -> f64 {
        self.curve
            .advance(multiplier, self.acceleration_rate, self.max_multiplier())
    }
}

/// Source of live configuration
///
/// `snapshot` is called from the tick loops and must be cheap. `reload` may
/// touch the filesystem; on failure the previous snapshot stays in effect.
pub trait ConfigProvider: Send + Sync {
    /// Current configuration
    fn snapshot(&self) -> Arc<Config>;

    /// Pick up external changes (e.g. a settings window rewrote the file)
    fn reload(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// In-memory or file-backed [`ConfigProvider`]
#[derive(Debug)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    current: RwLock<Arc<Config>>,
}

impl ConfigStore {
    /// Store that never touches the filesystem
    pub fn in_memory(config: Config) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Load from `path` (defaults if missing) and reload from it later
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the live configuration
    pub fn set(&self, config: Config) {
        *self.current.write() = Arc::new(config);
    }

    /// Apply an edit to a copy of the live configuration
    pub fn update(&self, edit: impl FnOnce(&mut Config)) {
        let mut current = self.current.write();
        let mut next = Config::clone(&current);
        edit(&mut next);
        *current = Arc::new(next);
    }

    /// Write the live configuration back to the backing file, if any
    pub fn save(&self) -> Result<(), ConfigError> {
        match &self.path {
            Some(path) => self.snapshot().save(path),
            None => Ok(()),
        }
    }
}

impl ConfigProvider for ConfigStore {
    fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let config = Config::load(path)?;
        *self.current.write() = Arc::new(config);
        Ok(())
    }
}

//! Hotkey dispatch: evdev keycodes to mouse actions
//!
//! The dispatcher owns the mouse-mode switch and the set of buttons held via
//! hold keys, and routes movement/scroll keys to the two accelerators.

use crate::accelerator::DirectionalAccelerator;
use crate::config::{ConfigProvider, HotkeySettings};
use crate::direction::Direction;
use crate::sink::{MotionSink, MouseButton};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a mapped key does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ToggleMode,
    Undo,
    Click(MouseButton),
    /// Press on first tap, release on the next
    Hold(MouseButton),
    Move(Direction),
    Scroll(Direction),
}

/// Keycode to action table built from `[hotkeys]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keymap {
    actions: HashMap<u16, Action>,
}

impl Keymap {
    /// Build the table
    ///
    /// When two actions share a keycode the later entry in this list wins;
    /// the toggle key is inserted last so it can never be shadowed.
    pub fn from_settings(hotkeys: &HotkeySettings) -> Self {
        let entries = [
            (hotkeys.undo, Action::Undo),
            (hotkeys.hold_left, Action::Hold(MouseButton::Left)),
            (hotkeys.scroll_up, Action::Scroll(Direction::Up)),
            (hotkeys.scroll_down, Action::Scroll(Direction::Down)),
            (hotkeys.scroll_left, Action::Scroll(Direction::Left)),
            (hotkeys.scroll_right, Action::Scroll(Direction::Right)),
            (hotkeys.move_up, Action::Move(Direction::Up)),
            (hotkeys.move_down, Action::Move(Direction::Down)),
            (hotkeys.move_left, Action::Move(Direction::Left)),
            (hotkeys.move_right, Action::Move(Direction::Right)),
            (hotkeys.left_click, Action::Click(MouseButton::Left)),
            (hotkeys.right_click, Action::Click(MouseButton::Right)),
            (hotkeys.middle_click, Action::Click(MouseButton::Middle)),
            (hotkeys.toggle_mode, Action::ToggleMode),
        ];

        let mut actions = HashMap::new();
        for (code, action) in entries {
            if let Some(previous) = actions.insert(code, action) {
                warn!(
                    "Keycode {} bound to both {:?} and {:?}; using {:?}",
                    code, previous, action, action
                );
            }
        }
        Self { actions }
    }

    pub fn action(&self, keycode: u16) -> Option<Action> {
        self.actions.get(&keycode).copied()
    }

    /// Every keycode with an action
    pub fn keycodes(&self) -> impl Iterator<Item = u16> + '_ {
        self.actions.keys().copied()
    }
}

/// Mutable dispatcher state
#[derive(Debug, Default)]
struct DispatchState {
    enabled: bool,
    keymap: Keymap,
    held_buttons: HashSet<MouseButton>,
}

/// Routes key events to the accelerators and the sink
pub struct HotkeyDispatcher {
    movement: DirectionalAccelerator,
    scroll: DirectionalAccelerator,
    sink: Arc<dyn MotionSink>,
    state: Mutex<DispatchState>,
}

impl HotkeyDispatcher {
    /// Build both accelerators around a shared sink and config
    pub fn new(sink: Arc<dyn MotionSink>, config: Arc<dyn ConfigProvider>) -> Self {
        let keymap = Keymap::from_settings(&config.snapshot().hotkeys);
        Self {
            movement: DirectionalAccelerator::movement(Arc::clone(&sink), Arc::clone(&config)),
            scroll: DirectionalAccelerator::scroll(Arc::clone(&sink), config),
            sink,
            state: Mutex::new(DispatchState {
                enabled: false,
                keymap,
                held_buttons: HashSet::new(),
            }),
        }
    }

    pub fn movement(&self) -> &DirectionalAccelerator {
        &self.movement
    }

    pub fn scroll(&self) -> &DirectionalAccelerator {
        &self.scroll
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn held_buttons(&self) -> HashSet<MouseButton> {
        self.state.lock().held_buttons.clone()
    }

    /// Switch mouse mode on or off
    ///
    /// Turning it off stops all motion and releases held buttons.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        self.apply_enabled(&mut state, enabled);
    }

    /// Toggle mouse mode, returning the new state
    pub fn toggle(&self) -> bool {
        let mut state = self.state.lock();
        let enabled = !state.enabled;
        self.apply_enabled(&mut state, enabled);
        enabled
    }

    fn apply_enabled(&self, state: &mut DispatchState, enabled: bool) {
        if state.enabled == enabled {
            return;
        }
        state.enabled = enabled;
        if !enabled {
            self.halt(state);
        }
        info!("Mouse mode: {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Swap in new hotkeys after a settings change
    ///
    /// Motion is stopped first so no direction stays latched on a key that
    /// is no longer mapped.
    pub fn reload(&self, hotkeys: &HotkeySettings) {
        let mut state = self.state.lock();
        self.halt(&mut state);
        state.keymap = Keymap::from_settings(hotkeys);
        info!("Hotkeys reloaded");
    }

    /// Handle a key event
    ///
    /// `pressed` is true for both key-down and autorepeat. Returns true if
    /// the key was consumed and must not reach other applications.
    pub fn handle_key(&self, keycode: u16, pressed: bool) -> bool {
        let action = {
            let state = self.state.lock();
            let action = state.keymap.action(keycode);
            if !state.enabled && action != Some(Action::ToggleMode) {
                return false;
            }
            action
        };
        let Some(action) = action else {
            return false;
        };
        debug!("Key {} {} -> {:?}", keycode, if pressed { "down" } else { "up" }, action);

        match action {
            Action::ToggleMode => {
                if pressed {
                    self.toggle();
                }
            }
            Action::Undo => {
                if pressed && !self.movement.undo() {
                    debug!("Nothing to undo");
                }
            }
            Action::Click(button) => {
                if pressed {
                    if let Err(e) = self.sink.click(button) {
                        warn!("Failed to click {}: {}", button, e);
                    }
                }
            }
            Action::Hold(button) => {
                if pressed {
                    self.toggle_hold(button);
                }
            }
            Action::Move(direction) => {
                if pressed {
                    self.movement.start_direction(direction);
                } else {
                    self.movement.stop_direction(direction);
                }
            }
            Action::Scroll(direction) => {
                if pressed {
                    self.scroll.start_direction(direction);
                } else {
                    self.scroll.stop_direction(direction);
                }
            }
        }
        true
    }

    /// Stop both accelerators, join their threads and release buttons
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            self.halt(&mut state);
        }
        self.movement.shutdown();
        self.scroll.shutdown();
    }

    fn toggle_hold(&self, button: MouseButton) {
        let mut state = self.state.lock();
        let result = if state.held_buttons.remove(&button) {
            self.sink.release(button)
        } else {
            state.held_buttons.insert(button);
            self.sink.press(button)
        };
        if let Err(e) = result {
            warn!("Failed to toggle hold on {}: {}", button, e);
        }
    }

    fn halt(&self, state: &mut DispatchState) {
        self.movement.stop_all();
        self.scroll.stop_all();
        for button in state.held_buttons.drain() {
            if let Err(e) = self.sink.release(button) {
                warn!("Failed to release {}: {}", button, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigStore};
    use crate::testing::{RecordingSink, SinkCall};

    const KP8: u16 = 72;
    const KP4: u16 = 75;
    const KP7: u16 = 71;
    const KP5: u16 = 76;
    const KP_DOT: u16 = 83;
    const KP_PLUS: u16 = 78;
    const KP_SLASH: u16 = 98;
    const KEY_A: u16 = 30;

    fn dispatcher() -> (HotkeyDispatcher, Arc<RecordingSink>) {
        let mut config = Config::default();
        config.movement.move_delay = 1;
        config.scroll.delay = 1;
        let store = Arc::new(ConfigStore::in_memory(config));
        let sink = Arc::new(RecordingSink::default());
        (HotkeyDispatcher::new(sink.clone(), store), sink)
    }

    #[test]
    fn test_default_keymap() {
        let keymap = Keymap::from_settings(&HotkeySettings::default());
        assert_eq!(keymap.action(KP_PLUS), Some(Action::ToggleMode));
        assert_eq!(keymap.action(KP8), Some(Action::Move(Direction::Up)));
        assert_eq!(keymap.action(KP7), Some(Action::Scroll(Direction::Up)));
        assert_eq!(keymap.action(73), Some(Action::Scroll(Direction::Right)));
        assert_eq!(keymap.action(KP5), Some(Action::Click(MouseButton::Left)));
        assert_eq!(keymap.action(KP_DOT), Some(Action::Hold(MouseButton::Left)));
        assert_eq!(keymap.action(KP_SLASH), Some(Action::Undo));
        assert_eq!(keymap.action(KEY_A), None);
        assert_eq!(keymap.keycodes().count(), 14);
    }

    #[test]
    fn test_toggle_key_wins_collisions() {
        let hotkeys = HotkeySettings {
            move_up: 78,
            ..HotkeySettings::default()
        };
        let keymap = Keymap::from_settings(&hotkeys);
        assert_eq!(keymap.action(78), Some(Action::ToggleMode));
    }

    #[test]
    fn test_disabled_passes_everything_but_toggle() {
        let (d, sink) = dispatcher();
        assert!(!d.handle_key(KP8, true));
        assert!(!d.handle_key(KP5, true));
        assert!(!d.handle_key(KEY_A, true));
        assert!(d.movement().active_directions().is_empty());
        assert!(sink.is_empty());

        assert!(d.handle_key(KP_PLUS, true));
        assert!(d.is_enabled());
        // Release of the toggle key is consumed too, but changes nothing
        assert!(d.handle_key(KP_PLUS, false));
        assert!(d.is_enabled());
        d.shutdown();
    }

    #[test]
    fn test_movement_keys_start_and_stop() {
        let (d, _sink) = dispatcher();
        d.set_enabled(true);
        assert!(d.handle_key(KP8, true));
        assert!(d.handle_key(KP4, true));
        // Autorepeat reports as pressed
        assert!(d.handle_key(KP8, true));
        assert!(d.movement().active_directions().contains(Direction::Up));
        assert!(d.movement().active_directions().contains(Direction::Left));

        assert!(d.handle_key(KP8, false));
        assert!(!d.movement().active_directions().contains(Direction::Up));
        assert!(!d.handle_key(KEY_A, true));
        d.shutdown();
    }

    #[test]
    fn test_scroll_keys_drive_scroll_accelerator() {
        let (d, _sink) = dispatcher();
        d.set_enabled(true);
        d.handle_key(KP7, true);
        assert!(d.scroll().active_directions().contains(Direction::Up));
        assert!(d.movement().active_directions().is_empty());
        d.handle_key(KP7, false);
        assert!(d.scroll().active_directions().is_empty());
        d.shutdown();
    }

    #[test]
    fn test_click_and_hold() {
        let (d, sink) = dispatcher();
        d.set_enabled(true);
        d.handle_key(KP5, true);
        d.handle_key(KP5, false);
        d.handle_key(KP_DOT, true);
        assert!(d.held_buttons().contains(&MouseButton::Left));
        d.handle_key(KP_DOT, false);
        d.handle_key(KP_DOT, true);
        assert!(d.held_buttons().is_empty());

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Press(MouseButton::Left),
                SinkCall::Release(MouseButton::Left),
                SinkCall::Press(MouseButton::Left),
                SinkCall::Release(MouseButton::Left),
            ]
        );
        d.shutdown();
    }

    #[test]
    fn test_disable_stops_motion_and_releases_buttons() {
        let (d, sink) = dispatcher();
        d.set_enabled(true);
        d.handle_key(KP_DOT, true);
        d.handle_key(KP8, true);
        d.handle_key(KP7, true);

        d.handle_key(KP_PLUS, true);
        assert!(!d.is_enabled());
        assert!(d.movement().active_directions().is_empty());
        assert!(d.scroll().active_directions().is_empty());
        assert!(d.held_buttons().is_empty());
        assert!(sink.calls().contains(&SinkCall::Release(MouseButton::Left)));
        d.shutdown();
    }

    #[test]
    fn test_concurrent_toggles_are_not_lost() {
        let (d, _sink) = dispatcher();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        d.toggle();
                    }
                });
            }
        });
        // 1000 flips from disabled lands back on disabled
        assert!(!d.is_enabled());
        assert!(d.toggle());
        d.shutdown();
    }

    #[test]
    fn test_undo_key_reverses_last_move() {
        let (d, sink) = dispatcher();
        d.set_enabled(true);
        d.movement().ledger().unwrap().record(5, -5);
        assert!(d.handle_key(KP_SLASH, true));
        assert_eq!(sink.calls(), vec![SinkCall::Move(-5, 5)]);
        // Empty history: still consumed, no sink call
        assert!(d.handle_key(KP_SLASH, true));
        assert_eq!(sink.len(), 1);
        d.shutdown();
    }

    #[test]
    fn test_reload_remaps_and_stops_motion() {
        let (d, _sink) = dispatcher();
        d.set_enabled(true);
        d.handle_key(KP8, true);

        let hotkeys = HotkeySettings {
            move_up: KEY_A,
            ..HotkeySettings::default()
        };
        d.reload(&hotkeys);
        assert!(d.movement().active_directions().is_empty());
        assert!(!d.handle_key(KP8, true));
        assert!(d.handle_key(KEY_A, true));
        assert!(d.movement().active_directions().contains(Direction::Up));
        d.shutdown();
    }
}

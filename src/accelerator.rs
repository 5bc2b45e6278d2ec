//! Held-direction accelerator: the continuous movement/scroll engine
//!
//! Each [`DirectionalAccelerator`] owns a set of held directions, a speed
//! multiplier and (while anything is held) one background tick thread. Every
//! tick turns the held set into a `(dx, dy)` delta, sends it to the sink and
//! advances the multiplier along the configured curve.
//!
//! Movement and scroll share this engine and differ only in [`MotionKind`]:
//! the config section they read, the sign convention of the delta, and
//! whether deltas are recorded for undo.

use crate::config::{Config, ConfigProvider, MotionParameters};
use crate::direction::{Direction, DirectionError, DirectionSet};
use crate::sink::{MotionSink, SinkError};
use crate::undo::UndoLedger;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Ticks between config refreshes (~1s at the default 20ms period)
pub const CONFIG_REFRESH_TICKS: u32 = 50;

/// Which engine an accelerator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    /// Pointer movement, screen coordinates (y grows downward)
    Movement,
    /// Wheel scrolling (dy > 0 scrolls up, dx > 0 scrolls right)
    Scroll,
}

impl MotionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionKind::Movement => "movement",
            MotionKind::Scroll => "scroll",
        }
    }

    /// Read this kind's parameters from a config snapshot
    pub fn parameters(self, config: &Config) -> MotionParameters {
        match self {
            MotionKind::Movement => config.movement.parameters(),
            MotionKind::Scroll => config.scroll.parameters(),
        }
    }

    /// Delta for the held directions at a given step size
    ///
    /// Directions combine additively, so diagonals come for free and
    /// opposite directions cancel to zero on that axis. The cancellation is
    /// kept for scroll as well: holding up and down scrolls nowhere.
    pub fn delta(self, directions: DirectionSet, speed: i32) -> (i32, i32) {
        let mut dx = 0;
        let mut dy = 0;
        if directions.contains(Direction::Left) {
            dx -= speed;
        }
        if directions.contains(Direction::Right) {
            dx += speed;
        }
        let (up, down) = match self {
            MotionKind::Movement => (-speed, speed),
            MotionKind::Scroll => (speed, -speed),
        };
        if directions.contains(Direction::Up) {
            dy += up;
        }
        if directions.contains(Direction::Down) {
            dy += down;
        }
        (dx, dy)
    }

    fn emit(self, sink: &dyn MotionSink, dx: i32, dy: i32) -> Result<(), SinkError> {
        match self {
            MotionKind::Movement => sink.move_by(dx, dy),
            MotionKind::Scroll => sink.scroll(dx, dy),
        }
    }
}

impl fmt::Display for MotionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state, only touched under `Shared::state`
#[derive(Debug)]
struct AcceleratorState {
    active: DirectionSet,
    multiplier: f64,
    running: bool,
    /// Bumped for every spawned loop; a loop whose number is stale exits
    generation: u64,
    /// Bumped on every full stop, so a tick in flight can tell it was stopped
    stops: u64,
}

impl AcceleratorState {
    fn reset_speed(&mut self) {
        self.multiplier = 1.0;
        self.stops = self.stops.wrapping_add(1);
    }
}

struct Shared {
    kind: MotionKind,
    state: Mutex<AcceleratorState>,
    sink: Arc<dyn MotionSink>,
    config: Arc<dyn ConfigProvider>,
    ledger: Option<Arc<UndoLedger>>,
}

impl Shared {
    fn current_parameters(&self) -> MotionParameters {
        self.kind.parameters(&self.config.snapshot())
    }

    /// Reload config; on failure the provider keeps its previous snapshot
    fn refresh_parameters(&self) -> MotionParameters {
        if let Err(e) = self.config.reload() {
            debug!("{} config reload failed, keeping previous settings: {}", self.kind, e);
        }
        self.current_parameters()
    }
}

/// Converts held directions into an accelerating stream of deltas
pub struct DirectionalAccelerator {
    shared: Arc<Shared>,
    /// Handle of the most recently spawned loop
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DirectionalAccelerator {
    /// Pointer accelerator with its own undo history
    pub fn movement(sink: Arc<dyn MotionSink>, config: Arc<dyn ConfigProvider>) -> Self {
        let ledger = Arc::new(UndoLedger::new(Arc::clone(&sink), Arc::clone(&config)));
        Self::new(MotionKind::Movement, sink, config, Some(ledger))
    }

    /// Wheel accelerator; scroll deltas are never recorded for undo
    pub fn scroll(sink: Arc<dyn MotionSink>, config: Arc<dyn ConfigProvider>) -> Self {
        Self::new(MotionKind::Scroll, sink, config, None)
    }

    fn new(
        kind: MotionKind,
        sink: Arc<dyn MotionSink>,
        config: Arc<dyn ConfigProvider>,
        ledger: Option<Arc<UndoLedger>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                kind,
                state: Mutex::new(AcceleratorState {
                    active: DirectionSet::empty(),
                    multiplier: 1.0,
                    running: false,
                    generation: 0,
                    stops: 0,
                }),
                sink,
                config,
                ledger,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> MotionKind {
        self.shared.kind
    }

    /// Start (or keep) moving in `direction`
    ///
    /// Spawns the tick loop if none is running. The check and the spawn
    /// happen under the state lock, so two callers racing here still end up
    /// with a single loop.
    pub fn start_direction(&self, direction: Direction) {
        let mut state = self.shared.state.lock();
        state.active.insert(direction);
        if state.running {
            return;
        }

        state.running = true;
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let shared = Arc::clone(&self.shared);

        let spawned = thread::Builder::new()
            .name(format!("numpad-{}", self.shared.kind))
            .spawn(move || run_loop(shared, generation));

        match spawned {
            Ok(handle) => {
                // Replacing an old handle detaches a loop that is already exiting
                *self.worker.lock() = Some(handle);
            }
            Err(e) => {
                warn!("Failed to spawn {} loop: {}", self.shared.kind, e);
                state.running = false;
            }
        }
    }

    /// Stop moving in `direction`
    ///
    /// The loop is not interrupted; it sees the empty set on its next tick
    /// and exits by itself.
    pub fn stop_direction(&self, direction: Direction) {
        let mut state = self.shared.state.lock();
        state.active.remove(direction);
        if state.active.is_empty() {
            state.reset_speed();
        }
    }

    /// Validate a direction name and start it
    pub fn start_named(&self, name: &str) -> Result<(), DirectionError> {
        self.start_direction(name.parse()?);
        Ok(())
    }

    /// Validate a direction name and stop it
    pub fn stop_named(&self, name: &str) -> Result<(), DirectionError> {
        self.stop_direction(name.parse()?);
        Ok(())
    }

    /// Clear every held direction and tell the loop to stop
    ///
    /// The state change is visible as soon as this returns. The thread
    /// itself exits within one tick period; use [`shutdown`](Self::shutdown)
    /// to wait for it.
    pub fn stop_all(&self) {
        let mut state = self.shared.state.lock();
        state.active.clear();
        state.reset_speed();
        state.running = false;
    }

    /// Stop and join the loop thread
    pub fn shutdown(&self) {
        self.stop_all();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("{} loop panicked", self.shared.kind);
            }
        }
    }

    /// Reverse the last recorded movement delta
    ///
    /// Always false for the scroll accelerator.
    pub fn undo(&self) -> bool {
        match &self.shared.ledger {
            Some(ledger) => ledger.undo(),
            None => false,
        }
    }

    pub fn ledger(&self) -> Option<&Arc<UndoLedger>> {
        self.shared.ledger.as_ref()
    }

    pub fn active_directions(&self) -> DirectionSet {
        self.shared.state.lock().active
    }

    pub fn speed_multiplier(&self) -> f64 {
        self.shared.state.lock().multiplier
    }

    /// Whether a loop is (logically) running
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Parameters the next loop would start with
    pub fn parameters(&self) -> MotionParameters {
        self.shared.current_parameters()
    }
}

impl fmt::Debug for DirectionalAccelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DirectionalAccelerator")
            .field("kind", &self.shared.kind)
            .field("active", &state.active)
            .field("multiplier", &state.multiplier)
            .field("running", &state.running)
            .finish()
    }
}

impl Drop for DirectionalAccelerator {
    fn drop(&mut self) {
        // Detach: the loop holds its own Arc and exits on its next tick
        self.stop_all();
    }
}

/// Background tick loop
fn run_loop(shared: Arc<Shared>, generation: u64) {
    let kind = shared.kind;
    debug!("{} loop started (generation {})", kind, generation);

    let mut params = shared.current_parameters();
    let mut ticks_since_refresh = 0u32;
    let mut sink_failing = false;

    loop {
        ticks_since_refresh += 1;
        if ticks_since_refresh >= CONFIG_REFRESH_TICKS {
            ticks_since_refresh = 0;
            params = shared.refresh_parameters();
        }

        let (directions, multiplier, stops) = {
            let mut state = shared.state.lock();
            if !state.running || state.generation != generation {
                break;
            }
            if state.active.is_empty() {
                state.running = false;
                break;
            }
            (state.active, state.multiplier, state.stops)
        };

        // A live config change may have lowered the ceiling
        let multiplier = multiplier.min(params.max_multiplier());
        let (dx, dy) = kind.delta(directions, params.step_at(multiplier));

        if dx != 0 || dy != 0 {
            match kind.emit(shared.sink.as_ref(), dx, dy) {
                Ok(()) => {
                    if sink_failing {
                        debug!("{} sink recovered", kind);
                        sink_failing = false;
                    }
                    if let Some(ledger) = &shared.ledger {
                        ledger.record(dx, dy);
                    }
                }
                Err(e) if !sink_failing => {
                    warn!("{} sink failed: {}", kind, e);
                    sink_failing = true;
                }
                Err(e) => debug!("{} sink still failing: {}", kind, e),
            }
        }

        {
            let mut state = shared.state.lock();
            // A full stop during the emit already reset the multiplier; a
            // key pressed again since then must start from 1.0
            if state.generation == generation && state.stops == stops && !state.active.is_empty() {
                let current = state.multiplier.min(params.max_multiplier());
                state.multiplier = params.advance(current);
            }
        }

        thread::sleep(params.tick_period);
    }

    debug!("{} loop exited (generation {})", kind, generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use crate::curve::AccelerationCurve;
    use crate::testing::{RecordingSink, SinkCall};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn set(directions: &[Direction]) -> DirectionSet {
        directions.iter().copied().collect()
    }

    fn fast_config(base: i32, rate: f64, max: i32) -> Config {
        let mut config = Config::default();
        config.movement.base_speed = base;
        config.movement.acceleration_rate = rate;
        config.movement.max_speed = max;
        config.movement.move_delay = 2;
        config.movement.curve = AccelerationCurve::Exponential;
        config.scroll.step = base;
        config.scroll.acceleration_rate = rate;
        config.scroll.max_speed = max;
        config.scroll.delay = 2;
        config
    }

    fn movement(config: Config) -> (DirectionalAccelerator, Arc<RecordingSink>, Arc<ConfigStore>) {
        let store = Arc::new(ConfigStore::in_memory(config));
        let sink = Arc::new(RecordingSink::default());
        let acc = DirectionalAccelerator::movement(sink.clone(), store.clone());
        (acc, sink, store)
    }

    #[test]
    fn test_movement_delta_rules() {
        use Direction::*;
        let m = MotionKind::Movement;
        assert_eq!(m.delta(set(&[Up, Left]), 10), (-10, -10));
        assert_eq!(m.delta(set(&[Up, Right]), 7), (7, -7));
        assert_eq!(m.delta(set(&[Down]), 3), (0, 3));
        assert_eq!(m.delta(set(&[Up, Down]), 5), (0, 0));
        assert_eq!(m.delta(set(&[Left, Right, Down]), 5), (0, 5));
        assert_eq!(m.delta(DirectionSet::empty(), 5), (0, 0));
    }

    #[test]
    fn test_scroll_delta_rules() {
        use Direction::*;
        let s = MotionKind::Scroll;
        assert_eq!(s.delta(set(&[Up]), 3), (0, 3));
        assert_eq!(s.delta(set(&[Down]), 3), (0, -3));
        assert_eq!(s.delta(set(&[Left]), 3), (-3, 0));
        assert_eq!(s.delta(set(&[Right, Up]), 4), (4, 4));
        assert_eq!(s.delta(set(&[Up, Down]), 3), (0, 0));
        assert_eq!(s.delta(set(&[Left, Right]), 3), (0, 0));
    }

    #[test]
    fn test_start_stop_tracks_held_set() {
        let (acc, _sink, _) = movement(fast_config(10, 1.0, 10));
        acc.start_direction(Direction::Up);
        acc.start_direction(Direction::Left);
        acc.start_direction(Direction::Up);
        assert_eq!(acc.active_directions(), set(&[Direction::Up, Direction::Left]));

        acc.stop_direction(Direction::Up);
        acc.stop_direction(Direction::Down);
        assert_eq!(acc.active_directions(), set(&[Direction::Left]));

        acc.stop_direction(Direction::Left);
        assert!(acc.active_directions().is_empty());
        assert_eq!(acc.speed_multiplier(), 1.0);
        acc.shutdown();
    }

    #[test]
    fn test_stop_all_is_synchronous() {
        let (acc, sink, _) = movement(fast_config(2, 1.2, 100));
        acc.start_direction(Direction::Right);
        acc.start_direction(Direction::Down);
        assert!(sink.wait_for(5, WAIT));

        acc.stop_all();
        assert!(acc.active_directions().is_empty());
        assert_eq!(acc.speed_multiplier(), 1.0);
        assert!(!acc.is_running());
        acc.shutdown();
    }

    #[test]
    fn test_first_tick_emits_base_step() {
        let (acc, sink, _) = movement(fast_config(10, 1.5, 40));
        acc.start_direction(Direction::Up);
        acc.start_direction(Direction::Left);
        assert!(sink.wait_for(1, WAIT));
        acc.shutdown();

        // The second start may land before or after the first tick
        let first = sink.calls()[0];
        assert!(
            first == SinkCall::Move(-10, -10) || first == SinkCall::Move(0, -10),
            "unexpected first call {first:?}"
        );
    }

    #[test]
    fn test_multiplier_resets_after_loop_exit() {
        let (acc, sink, _) = movement(fast_config(1, 2.0, 50));
        acc.start_direction(Direction::Right);
        assert!(sink.wait_for(3, WAIT));
        assert!(acc.speed_multiplier() > 1.0);

        acc.stop_direction(Direction::Right);
        assert_eq!(acc.speed_multiplier(), 1.0);
        acc.shutdown();
        assert_eq!(acc.speed_multiplier(), 1.0);
        assert!(!acc.is_running());
    }

    /// Sink that blocks inside the `hold_at`-th move until released
    struct GatedSink {
        moves: Mutex<Vec<(i32, i32)>>,
        hold_at: usize,
        open: Mutex<bool>,
        opened: parking_lot::Condvar,
    }

    impl GatedSink {
        fn new(hold_at: usize) -> Self {
            Self {
                moves: Mutex::new(Vec::new()),
                hold_at,
                open: Mutex::new(false),
                opened: parking_lot::Condvar::new(),
            }
        }

        fn moves(&self) -> Vec<(i32, i32)> {
            self.moves.lock().clone()
        }

        fn wait_for(&self, count: usize) -> bool {
            let deadline = std::time::Instant::now() + WAIT;
            while std::time::Instant::now() < deadline {
                if self.moves.lock().len() >= count {
                    return true;
                }
                thread::sleep(Duration::from_millis(1));
            }
            false
        }

        fn open_gate(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }
    }

    impl MotionSink for GatedSink {
        fn move_by(&self, dx: i32, dy: i32) -> Result<(), SinkError> {
            let count = {
                let mut moves = self.moves.lock();
                moves.push((dx, dy));
                moves.len()
            };
            if count == self.hold_at {
                let mut open = self.open.lock();
                while !*open {
                    self.opened.wait(&mut open);
                }
            }
            Ok(())
        }

        fn scroll(&self, _dx: i32, _dy: i32) -> Result<(), SinkError> {
            Ok(())
        }

        fn press(&self, _button: crate::sink::MouseButton) -> Result<(), SinkError> {
            Ok(())
        }

        fn release(&self, _button: crate::sink::MouseButton) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_full_stop_during_emit_restarts_at_base_step() {
        let store = Arc::new(ConfigStore::in_memory(fast_config(1, 2.0, 64)));
        let sink = Arc::new(GatedSink::new(5));
        let acc = DirectionalAccelerator::movement(sink.clone(), store);

        acc.start_direction(Direction::Right);
        // Tick 5 runs at 2^4 and is now stuck in the sink
        assert!(sink.wait_for(5));
        assert_eq!(sink.moves()[4], (16, 0));

        acc.stop_direction(Direction::Right);
        assert_eq!(acc.speed_multiplier(), 1.0);
        acc.start_direction(Direction::Right);
        sink.open_gate();

        assert!(sink.wait_for(7));
        acc.shutdown();
        let moves = sink.moves();
        assert_eq!(moves[5], (1, 0), "acceleration survived a full stop");
        assert_eq!(moves[6], (2, 0));
    }

    #[test]
    fn test_no_deltas_after_shutdown() {
        let (acc, sink, _) = movement(fast_config(3, 1.0, 3));
        acc.start_direction(Direction::Down);
        assert!(sink.wait_for(2, WAIT));
        acc.shutdown();

        let settled = sink.len();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.len(), settled);
    }

    #[test]
    fn test_restart_right_after_stop_all_keeps_single_loop() {
        let (acc, sink, _) = movement(fast_config(1, 1.0, 1));
        for _ in 0..20 {
            acc.start_direction(Direction::Right);
            acc.stop_all();
        }
        acc.start_direction(Direction::Right);
        std::thread::sleep(Duration::from_millis(5));
        sink.clear();

        // One loop at a 2ms period: ~25 ticks in 50ms, never double that
        std::thread::sleep(Duration::from_millis(50));
        let ticks = sink.len();
        acc.shutdown();
        assert!(ticks <= 30, "more ticks than one loop can produce: {ticks}");
    }

    #[test]
    fn test_movement_records_undo_scroll_does_not() {
        let config = fast_config(4, 1.0, 4);
        let store = Arc::new(ConfigStore::in_memory(config));
        let sink = Arc::new(RecordingSink::default());
        let mover = DirectionalAccelerator::movement(sink.clone(), store.clone());
        let scroller = DirectionalAccelerator::scroll(sink.clone(), store.clone());

        scroller.start_direction(Direction::Up);
        assert!(sink.wait_for(2, WAIT));
        scroller.shutdown();
        assert!(mover.ledger().unwrap().is_empty());
        assert!(scroller.ledger().is_none());
        assert!(!scroller.undo());

        mover.start_direction(Direction::Left);
        let before = sink.len();
        assert!(sink.wait_for(before + 1, WAIT));
        mover.shutdown();
        assert!(!mover.ledger().unwrap().is_empty());

        sink.clear();
        assert!(mover.undo());
        assert_eq!(sink.calls(), vec![SinkCall::Move(4, 0)]);
    }

    #[test]
    fn test_sink_failure_does_not_stop_loop() {
        let (acc, sink, _) = movement(fast_config(2, 1.0, 2));
        sink.set_failing(true);
        acc.start_direction(Direction::Up);
        assert!(sink.wait_for(4, WAIT));
        assert!(acc.is_running());
        acc.shutdown();
        // Failed moves never reached the pointer, so nothing to undo
        assert!(acc.ledger().unwrap().is_empty());
    }

    #[test]
    fn test_named_directions_are_validated() {
        let (acc, _sink, _) = movement(fast_config(1, 1.0, 1));
        assert!(acc.start_named("sideways").is_err());
        assert!(acc.active_directions().is_empty());
        assert!(!acc.is_running());

        acc.start_named("left").unwrap();
        assert_eq!(acc.active_directions(), set(&[Direction::Left]));
        acc.stop_named("left").unwrap();
        assert!(acc.stop_named("nowhere").is_err());
        acc.shutdown();
    }

    #[test]
    fn test_live_config_change_applies_without_restart() {
        let (acc, sink, store) = movement(fast_config(2, 1.0, 100));
        acc.start_direction(Direction::Right);
        assert!(sink.wait_for(1, WAIT));
        assert_eq!(sink.calls()[0], SinkCall::Move(2, 0));

        store.update(|c| c.movement.base_speed = 7);
        let seen = sink.len();
        assert!(sink.wait_for(seen + CONFIG_REFRESH_TICKS as usize + 2, Duration::from_secs(5)));
        acc.shutdown();

        assert_eq!(sink.calls().last(), Some(&SinkCall::Move(7, 0)));
    }
}

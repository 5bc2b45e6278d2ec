//! Test doubles for the motion sink
//!
//! Used by the unit tests and the integration tests in `tests/`.

use crate::sink::{MotionSink, MouseButton, SinkError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// One call received by a [`RecordingSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Move(i32, i32),
    Scroll(i32, i32),
    Press(MouseButton),
    Release(MouseButton),
}

/// Sink that records every call and can be told to fail
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failing: AtomicBool,
}

impl RecordingSink {
    /// Make every subsequent call fail (calls are still recorded)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    /// Poll until at least `count` calls arrived or `timeout` elapsed
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.len() >= count {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.len() >= count
    }

    fn record(&self, call: SinkCall) -> Result<(), SinkError> {
        self.calls.lock().push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("recording sink set to fail".into()));
        }
        Ok(())
    }
}

impl MotionSink for RecordingSink {
    fn move_by(&self, dx: i32, dy: i32) -> Result<(), SinkError> {
        self.record(SinkCall::Move(dx, dy))
    }

    fn scroll(&self, dx: i32, dy: i32) -> Result<(), SinkError> {
        self.record(SinkCall::Scroll(dx, dy))
    }

    fn press(&self, button: MouseButton) -> Result<(), SinkError> {
        self.record(SinkCall::Press(button))
    }

    fn release(&self, button: MouseButton) -> Result<(), SinkError> {
        self.record(SinkCall::Release(button))
    }
}

//! Bounded history of movement deltas
//!
//! The movement tick loop records every delta it sends; `undo` pops the most
//! recent one and sends its negation, walking the pointer back one tick.

use crate::config::ConfigProvider;
use crate::sink::MotionSink;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

/// A delta previously sent to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoEntry {
    pub dx: i32,
    pub dy: i32,
}

/// Undo history shared between the movement loop and the key dispatcher
pub struct UndoLedger {
    entries: Mutex<VecDeque<UndoEntry>>,
    sink: Arc<dyn MotionSink>,
    config: Arc<dyn ConfigProvider>,
}

impl UndoLedger {
    pub fn new(sink: Arc<dyn MotionSink>, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            sink,
            config,
        }
    }

    /// Append a delta, dropping the oldest entries beyond `undo.max_levels`
    pub fn record(&self, dx: i32, dy: i32) {
        let max_levels = self.config.snapshot().undo.max_levels;
        let mut entries = self.entries.lock();
        entries.push_back(UndoEntry { dx, dy });
        while entries.len() > max_levels {
            entries.pop_front();
        }
    }

    /// Reverse the most recent delta
    ///
    /// Returns false (without touching the sink) when the history is empty.
    pub fn undo(&self) -> bool {
        // Pop under the lock, emit outside it
        let Some(entry) = self.entries.lock().pop_back() else {
            return false;
        };
        debug!("Undo: reversing ({}, {})", entry.dx, entry.dy);
        if let Err(e) = self.sink.move_by(-entry.dx, -entry.dy) {
            warn!("Failed to undo movement: {}", e);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Copy of the history, oldest first
    pub fn entries(&self) -> Vec<UndoEntry> {
        self.entries.lock().iter().copied().collect()
    }
}

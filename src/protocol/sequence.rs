use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::core::SEQUENCE_WINDOW;

/// Next sequence number, never 0
pub fn next_seq(seq: u8) -> u8 {
    (seq as u16 % 255 + 1) as u8
}

/// Inverse of [`next_seq`]
pub fn prev_seq(seq: u8) -> u8 {
    ((seq as i16 - 2).rem_euclid(255) + 1) as u8
}

/// Compares sequence numbers with wraparound tolerance
///
/// Sequences run 1..=255 and wrap back to 1. Zero disables sequencing: a
/// packet carrying it is always accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGuard {
    /// Incoming values below this are treated as wrapped when the current
    /// value is above `255 - window`
    pub window: u8,
}

impl Default for SequenceGuard {
    fn default() -> Self {
        SequenceGuard {
            window: SEQUENCE_WINDOW,
        }
    }
}

impl SequenceGuard {
    pub fn new(window: u8) -> Self {
        SequenceGuard { window }
    }

    /// Whether `incoming` is stale relative to `current`
    pub fn should_ignore(&self, current: u8, incoming: u8) -> bool {
        if current == 0 || incoming == 0 {
            return false;
        }
        let wrapped = incoming < self.window && current > u8::MAX - self.window;
        incoming <= current && !wrapped
    }
}

/// [`SequenceGuard::should_ignore`] with the default window
pub fn should_ignore(current: u8, incoming: u8) -> bool {
    SequenceGuard::default().should_ignore(current, incoming)
}

/// Per-device sequence counter
///
/// Clones share the same counter, so a fixture handle and its pending
/// retransmission task observe the same value.
#[derive(Debug, Clone)]
pub struct Sequence {
    value: Arc<AtomicU8>,
    guard: SequenceGuard,
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::new(SequenceGuard::default())
    }
}

impl Sequence {
    /// Creates a counter starting at 1
    pub fn new(guard: SequenceGuard) -> Self {
        Sequence {
            value: Arc::new(AtomicU8::new(1)),
            guard,
        }
    }

    pub fn current(&self) -> u8 {
        self.value.load(Ordering::SeqCst)
    }

    pub fn set(&self, seq: u8) {
        self.value.store(seq, Ordering::SeqCst);
    }

    /// Advances the counter and returns the new value
    pub fn increment(&self) -> u8 {
        let prev = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(next_seq(v)))
            .unwrap_or_else(|v| v);
        next_seq(prev)
    }

    /// Steps the counter back and returns the new value
    pub fn decrement(&self) -> u8 {
        let prev = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(prev_seq(v)))
            .unwrap_or_else(|v| v);
        prev_seq(prev)
    }

    /// Whether `incoming` is stale relative to the current value
    pub fn should_ignore(&self, incoming: u8) -> bool {
        self.guard.should_ignore(self.current(), incoming)
    }

    /// Stores `incoming` unless it is stale; returns whether it was accepted
    pub fn accept(&self, incoming: u8) -> bool {
        self.value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if self.guard.should_ignore(current, incoming) {
                    None
                } else {
                    Some(incoming)
                }
            })
            .is_ok()
    }
}

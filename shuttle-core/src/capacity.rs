//! Capacity negotiation: the peer's advertised inbox size, and fitting messages into it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::protocol::{AppMessage, Key};

/// Inbox size assumed until the peer reports its own (the smallest inbox peers ship with).
pub const DEFAULT_INBOX_SIZE: u32 = 124;

/// Immutable capacity value taken at the start of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity(pub u32);

impl Capacity {
    pub fn bytes(self) -> usize {
        self.0 as usize
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity(DEFAULT_INBOX_SIZE)
    }
}

/// Shared, process-wide inbox size. Cloning shares the same value.
#[derive(Debug, Clone)]
pub struct CapacityState {
    inbox_size: Arc<AtomicU32>,
}

impl CapacityState {
    pub fn new() -> Self {
        Self::with_initial(DEFAULT_INBOX_SIZE)
    }

    pub fn with_initial(inbox_size: u32) -> Self {
        Self {
            inbox_size: Arc::new(AtomicU32::new(inbox_size)),
        }
    }

    /// Overwrite with the peer's report. Not validated.
    pub fn set(&self, inbox_size: u32) {
        self.inbox_size.store(inbox_size, Ordering::SeqCst);
    }

    /// Value for one batch. Later updates do not affect a snapshot already taken.
    pub fn snapshot(&self) -> Capacity {
        Capacity(self.inbox_size.load(Ordering::SeqCst))
    }
}

impl Default for CapacityState {
    fn default() -> Self {
        Self::new()
    }
}

/// Message still too large after shortening every display field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("message needs {size} bytes, inbox holds {capacity}")]
pub struct Oversized {
    pub size: usize,
    pub capacity: usize,
}

/// Shrink `msg` until it fits `capacity`, shortening the longest display field
/// (`route_name`, `stop_name`) one char at a time. Identifier fields are never touched.
/// Returns the keys that were shortened.
pub fn fit_to_capacity(msg: &mut AppMessage, capacity: Capacity) -> Result<Vec<Key>, Oversized> {
    let limit = capacity.bytes();
    let mut shortened = Vec::new();
    loop {
        let size = msg.payload_size();
        if size <= limit {
            break;
        }
        let Some((key, s)) = msg.longest_str_mut() else {
            return Err(Oversized {
                size,
                capacity: limit,
            });
        };
        s.pop();
        if !shortened.contains(&key) {
            shortened.push(key);
        }
    }
    Ok(shortened)
}

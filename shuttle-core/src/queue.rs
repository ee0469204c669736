//! Sequenced delivery: one batch, one item in flight, exponential backoff on failure.
//!
//! Items are framed against a capacity snapshot up front, then sent strictly in order.
//! A failed send retries the same item after the current backoff delay, which doubles
//! on every failure and returns to the base delay after every success. Each batch owns
//! its backoff state.

use std::time::Duration;

use crate::capacity::{fit_to_capacity, Capacity, Oversized};
use crate::channel::{Channel, SendError, Timer};
use crate::protocol::{AppMessage, Key, Record};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 12;

/// Retry limits for a batch. `max_attempts` counts sends of a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// None retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    pub fn unbounded(base_delay: Duration) -> Self {
        Self::new(base_delay, None)
    }

    fn exhausted(&self, attempts: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, Some(DEFAULT_MAX_ATTEMPTS))
    }
}

/// Current backoff delay of one batch.
#[derive(Debug, Clone, Copy)]
struct RetryState {
    base: Duration,
    current: Duration,
}

impl RetryState {
    fn new(base: Duration) -> Self {
        Self {
            base,
            current: base,
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay to wait now; the next failure waits twice as long.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2);
        delay
    }
}

/// Where a batch is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Sending(usize),
    Backoff(usize),
    Done,
    Dead(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Backoff waits taken across the whole batch.
    pub retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("item {index} undelivered after {attempts} attempts: {last}")]
    Dead {
        index: usize,
        attempts: u32,
        #[source]
        last: SendError,
    },
    #[error("item {index} does not fit the peer inbox: {source}")]
    Oversized {
        index: usize,
        #[source]
        source: Oversized,
    },
}

/// Build the wire messages of a batch: `list_index` on every item, `list_len` on the first,
/// each shrunk to fit `capacity`.
pub fn frame_batch(records: &[Record], capacity: Capacity) -> Result<Vec<AppMessage>, DeliveryError> {
    let len = records.len() as u32;
    records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let mut msg = record.to_message();
            if index == 0 {
                msg.insert(Key::ListLen, len);
            }
            msg.insert(Key::ListIndex, index as u32);
            let shortened = fit_to_capacity(&mut msg, capacity)
                .map_err(|source| DeliveryError::Oversized { index, source })?;
            if !shortened.is_empty() {
                tracing::debug!(index, fields = ?shortened, capacity = capacity.0, "shortened fields to fit inbox");
            }
            Ok(msg)
        })
        .collect()
}

/// One batch on its way to the peer.
pub struct Batch<'a, C: ?Sized, T: ?Sized> {
    channel: &'a C,
    timer: &'a T,
    messages: Vec<AppMessage>,
    policy: RetryPolicy,
    retry: RetryState,
    state: BatchState,
}

impl<'a, C, T> Batch<'a, C, T>
where
    C: Channel + ?Sized,
    T: Timer + ?Sized,
{
    /// Frame `records` against `capacity`. Fails before anything is sent if an item cannot fit.
    pub fn new(
        channel: &'a C,
        timer: &'a T,
        records: &[Record],
        capacity: Capacity,
        policy: RetryPolicy,
    ) -> Result<Self, DeliveryError> {
        Ok(Self {
            channel,
            timer,
            messages: frame_batch(records, capacity)?,
            policy,
            retry: RetryState::new(policy.base_delay),
            state: BatchState::Idle,
        })
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn messages(&self) -> &[AppMessage] {
        &self.messages
    }

    fn enter(&mut self, next: BatchState) {
        tracing::trace!(from = ?self.state, to = ?next, "batch state");
        self.state = next;
    }

    /// Deliver every item in order. Resolves when the last item is acknowledged,
    /// or with `Dead` once an item runs out of attempts. `state()` then reads
    /// `Done` or `Dead(index)`.
    pub async fn run(&mut self) -> Result<DeliveryReport, DeliveryError> {
        let total = self.messages.len();
        let mut index = 0;
        let mut attempts = 0u32;
        let mut retries = 0u32;
        while index < total {
            self.enter(BatchState::Sending(index));
            let sent = self.channel.send(&self.messages[index]).await;
            match sent {
                Ok(()) => {
                    self.retry.reset();
                    attempts = 0;
                    index += 1;
                }
                Err(e) => {
                    attempts += 1;
                    if self.policy.exhausted(attempts) {
                        self.enter(BatchState::Dead(index));
                        tracing::warn!(index, attempts, error = %e, "giving up on batch");
                        return Err(DeliveryError::Dead {
                            index,
                            attempts,
                            last: e,
                        });
                    }
                    let delay = self.retry.next_delay();
                    self.enter(BatchState::Backoff(index));
                    tracing::warn!(index, attempts, ?delay, error = %e, "item send failed; backing off");
                    self.timer.sleep(delay).await;
                    retries += 1;
                }
            }
        }
        self.enter(BatchState::Done);
        if total > 0 {
            tracing::info!(items = total, retries, "last item sent");
        }
        Ok(DeliveryReport {
            delivered: total,
            retries,
        })
    }
}

/// Deliver one batch. An empty batch sends nothing and succeeds.
pub async fn deliver_batch<C, T>(
    channel: &C,
    timer: &T,
    records: &[Record],
    capacity: Capacity,
    policy: RetryPolicy,
) -> Result<DeliveryReport, DeliveryError>
where
    C: Channel + ?Sized,
    T: Timer + ?Sized,
{
    let mut batch = Batch::new(channel, timer, records, capacity, policy)?;
    batch.run().await
}

/// Send a single message, retrying immediately (no backoff) on failure.
/// Returns the number of attempts it took.
pub async fn send_with_retry<C>(
    channel: &C,
    msg: &AppMessage,
    max_attempts: Option<u32>,
) -> Result<u32, DeliveryError>
where
    C: Channel + ?Sized,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match channel.send(msg).await {
            Ok(()) => return Ok(attempts),
            Err(e) => {
                if matches!(max_attempts, Some(max) if attempts >= max) {
                    return Err(DeliveryError::Dead {
                        index: 0,
                        attempts,
                        last: e,
                    });
                }
                tracing::debug!(attempts, error = %e, "send failed; retrying");
            }
        }
    }
}

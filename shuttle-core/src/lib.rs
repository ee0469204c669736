//! Shuttle relay core: bus feed transform and flow-controlled delivery to a constrained peer.
//! Host-driven: no sockets or HTTP here; the host supplies a `Source`, a `Channel` and a `Timer`.

pub mod capacity;
pub mod channel;
pub mod dispatch;
pub mod protocol;
pub mod queue;
pub mod source;
pub mod transform;
pub mod wire;

#[cfg(test)]
mod testing;

pub use capacity::{Capacity, CapacityState, DEFAULT_INBOX_SIZE};
pub use channel::{Channel, SendError, Timer, TokioTimer};
pub use dispatch::{DispatchError, Dispatcher, Outcome, Request};
pub use protocol::{AppMessage, Key, MessageType, Record, RouteType, SessionStatus, Value};
pub use queue::{deliver_batch, send_with_retry, BatchState, DeliveryError, DeliveryReport, RetryPolicy};
pub use source::{FetchError, Query, Source};
pub use transform::{Pattern, Transformer};
pub use wire::{Frame, FrameDecodeError, FrameEncodeError, Seq};

//! Seams to the host: the downstream channel to the peer and the clock used for backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::AppMessage;

/// Ordered, acknowledged, message-at-a-time link to the peer.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one message. Resolves once the peer has accepted or rejected it.
    async fn send(&self, msg: &AppMessage) -> Result<(), SendError>;
}

#[async_trait]
impl<C: Channel + ?Sized> Channel for Arc<C> {
    async fn send(&self, msg: &AppMessage) -> Result<(), SendError> {
        (**self).send(msg).await
    }
}

/// A single send that did not go through. Always retryable from the queue's point of view.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("peer rejected message")]
    Rejected,
    #[error("no acknowledgment within {0:?}")]
    Timeout(Duration),
    #[error("no peer connected")]
    NotConnected,
    #[error("frame error: {0}")]
    Frame(#[from] crate::wire::FrameEncodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of backoff delays.
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[async_trait]
impl<T: Timer + ?Sized> Timer for Arc<T> {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

/// Wall-clock timer on the tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

//! Inbound request dispatch: classify what the peer asked for and run fetch → transform → deliver.

use std::sync::atomic::{AtomicU8, Ordering};

use chrono::NaiveDate;

use crate::capacity::CapacityState;
use crate::channel::{Channel, Timer};
use crate::protocol::{status_message, AppMessage, Key, MessageType, Record, SessionStatus, Value};
use crate::queue::{deliver_batch, send_with_retry, DeliveryError, RetryPolicy};
use crate::source::{FetchError, Query, Source};
use crate::transform::{group_by_type, Transformer};

/// What the peer asked for. Classification is total; anything else is `Unrecognized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    SetInboxSize { inbox_size: u32 },
    Routes,
    RoutePattern { route_short_name: String },
    Unrecognized,
}

impl Request {
    /// A known type missing its required field is `Unrecognized`.
    pub fn classify(msg: &AppMessage) -> Self {
        match msg.message_type() {
            Some(MessageType::SetInboxSize) => msg
                .get(Key::InboxSize)
                .and_then(Value::as_u32)
                .map(|inbox_size| Request::SetInboxSize { inbox_size })
                .unwrap_or(Request::Unrecognized),
            Some(MessageType::Routes) => Request::Routes,
            Some(MessageType::RoutePattern) => msg
                .get(Key::RouteShortName)
                .and_then(Value::as_str)
                .map(|name| Request::RoutePattern {
                    route_short_name: name.to_string(),
                })
                .unwrap_or(Request::Unrecognized),
            _ => Request::Unrecognized,
        }
    }
}

/// Result of handling one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    InboxUpdated { inbox_size: u32 },
    Delivered {
        batches: usize,
        items: usize,
        /// Source elements dropped by the transform.
        skipped: usize,
    },
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Owns the session-wide state (capacity, status) and the seams to upstream and the peer.
pub struct Dispatcher<S, C, T> {
    source: S,
    channel: C,
    timer: T,
    transformer: Transformer,
    policy: RetryPolicy,
    capacity: CapacityState,
    status: AtomicU8,
}

impl<S, C, T> Dispatcher<S, C, T>
where
    S: Source,
    C: Channel,
    T: Timer,
{
    pub fn new(source: S, channel: C, timer: T) -> Self {
        Self {
            source,
            channel,
            timer,
            transformer: Transformer::new(),
            policy: RetryPolicy::default(),
            capacity: CapacityState::new(),
            status: AtomicU8::new(SessionStatus::Ready as u8),
        }
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_capacity(mut self, capacity: CapacityState) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn capacity(&self) -> &CapacityState {
        &self.capacity
    }

    pub fn status(&self) -> SessionStatus {
        match self.status.load(Ordering::SeqCst) {
            0 => SessionStatus::InboxUpdated,
            _ => SessionStatus::Ready,
        }
    }

    /// Session start: announce readiness so the peer sends its inbox size.
    pub async fn start_session(&self) -> Result<(), DispatchError> {
        self.status.store(SessionStatus::Ready as u8, Ordering::SeqCst);
        self.send_status().await
    }

    /// Classify and handle a raw inbound message.
    pub async fn handle_message(
        &self,
        msg: &AppMessage,
        today: NaiveDate,
    ) -> Result<Outcome, DispatchError> {
        self.handle(Request::classify(msg), today).await
    }

    /// Handle one request. `today` scopes pattern lookups to a service day.
    pub async fn handle(&self, request: Request, today: NaiveDate) -> Result<Outcome, DispatchError> {
        tracing::debug!(?request, "inbound request");
        match request {
            Request::SetInboxSize { inbox_size } => {
                self.capacity.set(inbox_size);
                self.status
                    .store(SessionStatus::InboxUpdated as u8, Ordering::SeqCst);
                tracing::info!(inbox_size, "inbox size set");
                self.send_status().await?;
                Ok(Outcome::InboxUpdated { inbox_size })
            }
            Request::Routes => self.send_routes().await,
            Request::RoutePattern { route_short_name } => {
                self.send_pattern(&route_short_name, today).await
            }
            Request::Unrecognized => {
                tracing::debug!("ignoring unrecognized request");
                Ok(Outcome::Ignored)
            }
        }
    }

    async fn send_status(&self) -> Result<(), DispatchError> {
        let status = self.status();
        let msg = status_message(status);
        let attempts = send_with_retry(&self.channel, &msg, self.policy.max_attempts).await?;
        tracing::debug!(attempts, ?status, "status message sent");
        Ok(())
    }

    async fn send_routes(&self) -> Result<Outcome, DispatchError> {
        let feed = self.fetch(&Query::Routes).await?;
        let routes = self.transformer.routes(&feed);
        if routes.skipped > 0 {
            tracing::warn!(skipped = routes.skipped, "routes feed had malformed entries");
        }
        let groups = group_by_type(routes.items);
        let mut items = 0;
        for (route_type, records) in &groups {
            tracing::debug!(?route_type, count = records.len(), "sending route group");
            items += self.deliver(records).await?;
        }
        Ok(Outcome::Delivered {
            batches: groups.len(),
            items,
            skipped: routes.skipped,
        })
    }

    async fn send_pattern(
        &self,
        route_short_name: &str,
        today: NaiveDate,
    ) -> Result<Outcome, DispatchError> {
        let query = Query::Pattern {
            route_short_name: route_short_name.to_string(),
            date: today,
        };
        let feed = self.fetch(&query).await?;
        let pattern = self.transformer.pattern(route_short_name, &feed);
        if pattern.skipped > 0 {
            tracing::warn!(route = route_short_name, skipped = pattern.skipped, "pattern feed had malformed entries");
        }
        let mut items = self.deliver(&pattern.items.point_records()).await?;
        items += self.deliver(&pattern.items.stop_records()).await?;
        Ok(Outcome::Delivered {
            batches: 2,
            items,
            skipped: pattern.skipped,
        })
    }

    async fn fetch(&self, query: &Query) -> Result<serde_json::Value, DispatchError> {
        tracing::debug!(path = %query.path(), "requesting feed");
        self.source.fetch(query).await.map_err(|e| {
            tracing::warn!(path = %query.path(), error = %e, "feed request failed");
            DispatchError::Fetch(e)
        })
    }

    /// One batch, sized against the capacity at the moment it starts.
    async fn deliver(&self, records: &[Record]) -> Result<usize, DispatchError> {
        let capacity = self.capacity.snapshot();
        let report = deliver_batch(&self.channel, &self.timer, records, capacity, self.policy).await?;
        Ok(report.delivered)
    }
}

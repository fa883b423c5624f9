//! # EventBus Abstraction
//!
//! A platform-level abstraction for event-driven messaging across marketplace
//! services (appointments, subscriptions, onboarding, notifications).
//!
//! ## Why This Lives in Tier 1
//!
//! The EventBus is a **shared runtime capability** every module depends on.
//! Placing it in `platform/` allows:
//! - Modules to depend on platform crates without circular dependencies
//! - Plug-and-play module development (modules don't depend on each other)
//! - Config-driven swap between NATS (production), InMemory (dev/test) and the
//!   no-op publisher (bus disabled / degraded mode)
//!
//! ## Pieces
//!
//! - [`EventEnvelope`]: the wire-level message shape shared by every
//!   producer/consumer, with a loosely-typed [`Payload`]
//! - [`EventBus`]: publish/subscribe transport ([`NatsBus`], [`InMemoryBus`])
//! - [`EventPublisher`]: fire-and-forget producer strategies
//!   ([`BusPublisher`], [`OutboxPublisher`], [`NoopPublisher`])
//! - [`consumer_retry`]: bounded exponential backoff for transient consume
//!   failures
//!
//! Delivery is at-least-once and unordered; consumers are responsible for
//! idempotency (see the `event-consumer` crate).

mod envelope;
mod inmemory_bus;
mod nats_bus;
mod payload;
mod publisher;

pub mod consumer_retry;
pub mod outbox;

pub use envelope::{event_types, subject_for, validate_envelope, EventEnvelope, SUBJECT_PREFIX};
pub use inmemory_bus::InMemoryBus;
pub use nats_bus::NatsBus;
pub use payload::{Payload, PayloadError, PayloadValue};
pub use publisher::{BusPublisher, EventPublisher, NoopPublisher};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;

/// A message received from the event bus
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject/topic this message was published to
    pub subject: String,
    /// The message payload (raw bytes)
    pub payload: Vec<u8>,
    /// Optional headers (reserved for future use)
    pub headers: Option<std::collections::HashMap<String, String>>,
    /// Optional reply-to subject (for request-response patterns)
    pub reply_to: Option<String>,
}

impl BusMessage {
    /// Create a new bus message
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self {
            subject,
            payload,
            headers: None,
            reply_to: None,
        }
    }

    /// Add headers to the message
    pub fn with_headers(mut self, headers: std::collections::HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Add a reply-to subject
    pub fn with_reply_to(mut self, reply_to: String) -> Self {
        self.reply_to = Some(reply_to);
        self
    }
}

/// Errors that can occur when using the event bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to subscribe to subject: {0}")]
    SubscribeError(String),

    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid subject pattern: {0}")]
    InvalidSubject(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Core event bus abstraction for publish-subscribe messaging
///
/// Delivery semantics are those of the underlying transport: at least once,
/// no ordering across subjects. Implementations must be cheap to clone behind
/// an `Arc`.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a message to a subject
    ///
    /// # Arguments
    /// * `subject` - The subject to publish to (e.g., "marketplace.events.USER_REGISTERED")
    /// * `payload` - The message payload as raw bytes
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Subscribe to messages matching a subject pattern
    ///
    /// # Arguments
    /// * `subject` - The subject pattern to subscribe to (supports wildcards: `*`, `>`)
    ///   - `*` matches a single token (e.g., `marketplace.*.USER_REGISTERED`)
    ///   - `>` matches one or more tokens (e.g., `marketplace.events.>`)
    async fn subscribe(&self, subject: &str) -> BusResult<BoxStream<'static, BusMessage>>;
}

impl fmt::Debug for dyn EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventBus")
    }
}

//! # Event Consumer
//!
//! Consume-side counterpart to `event-bus`: decodes raw bus messages into
//! envelopes, routes them by event type through an explicit registration
//! table, enforces per-consumer idempotency, and resolves each delivery to an
//! ack or nack disposition.
//!
//! Delivery is at-least-once and unordered, so the two defenses at this edge
//! are:
//!
//! 1. the [`IdempotencyGuard`] — the same event id is applied at most once per
//!    consumer, even under concurrent duplicate deliveries;
//! 2. handler-level transition checks — out-of-order application becomes a
//!    logged no-op ([`HandlerError::Permanent`]) instead of corrupted state.
//!
//! ```rust
//! use event_consumer::{Dispatcher, InMemoryDeadLetterQueue, InMemoryGuard};
//! use std::sync::Arc;
//!
//! # fn example(handler: Arc<dyn event_consumer::EventHandler>) {
//! let dispatcher = Dispatcher::new(
//!     "notifications",
//!     Arc::new(InMemoryGuard::new()),
//!     Arc::new(InMemoryDeadLetterQueue::new()),
//! )
//! .register(event_bus::event_types::USER_REGISTERED, handler);
//! # }
//! ```

mod dispatcher;
mod dlq;
mod idempotency;
mod runner;

pub use dispatcher::{Dispatcher, Disposition, EventHandler, HandlerError};
pub use dlq::{DeadLetter, DeadLetterQueue, InMemoryDeadLetterQueue, PgDeadLetterQueue};
pub use idempotency::{GuardError, IdempotencyGuard, InMemoryGuard, PgGuard};
pub use runner::run_consumer;

//! Subscriptions module
//!
//! Owns the subscription lifecycle: billing-driven state machine, webhook
//! ingestion keyed by the provider's external reference, per-plan usage
//! accounting, and the `PLAN_DOWNGRADED` fact other modules react to.

pub mod config;
pub mod consumer_tasks;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod store;
pub mod webhook;

pub use lifecycle::{InvalidTransition, SubscriptionStatus, SubscriptionTransition};
pub use models::Subscription;
pub use store::{InMemorySubscriptionStore, PgSubscriptionStore, StoreError, SubscriptionStore};

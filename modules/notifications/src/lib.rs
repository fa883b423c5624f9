//! Notifications module
//!
//! Owns the notification delivery lifecycle: events become PENDING
//! deliveries, the sender drives them to SENT or FAILED, the provider webhook
//! settles them as DELIVERED or BOUNCED, and a periodic sweep retries
//! failures until the attempt ceiling.

pub mod config;
pub mod consumer_tasks;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod retry;
pub mod sender;
pub mod store;
pub mod webhook;

pub use lifecycle::{DeliveryStatus, InvalidTransition};
pub use models::{NotificationDelivery, NotificationKind};
pub use sender::{LoggingSender, NotificationSender, SendError};
pub use store::{DeliveryOutcome, DeliveryStore, InMemoryDeliveryStore, PgDeliveryStore, StoreError};

//! Appointments module
//!
//! Owns the appointment lifecycle: booking state machine, event-driven
//! transitions, and the review request that follows a completed visit.

pub mod config;
pub mod consumer_tasks;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod store;

pub use lifecycle::{AppointmentStatus, AppointmentTransition, InvalidTransition};
pub use models::Appointment;
pub use store::{AppointmentStore, InMemoryAppointmentStore, PgAppointmentStore, StoreError};

//! Onboarding module
//!
//! Projects marketplace events onto per-provider onboarding checklists:
//! lazily created on registration, advanced by listings and plan changes,
//! removed with the account. This module owns no outbound events.

pub mod config;
pub mod consumer_tasks;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod store;

pub use lifecycle::{InvalidTransition, OnboardingStep, StepStatus, StepTransition};
pub use models::{Checklist, StepKind};
pub use store::{ChecklistStore, InMemoryChecklistStore, PgChecklistStore, StoreError};

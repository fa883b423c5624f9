//! # Event Envelope
//!
//! Platform-wide envelope format for all inter-service communication.
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: one envelope struct for the entire marketplace
//! 2. **Idempotency**: `event_id` is assigned exactly once at first publish and
//!    never regenerated on retry, so redelivery of the same logical event carries
//!    the same id
//! 3. **Forward compatibility**: consumers ignore unknown top-level and payload
//!    fields
//!
//! ## Wire format
//!
//! ```json
//! {
//!   "eventId": "<uuid>",
//!   "eventType": "<UPPER_SNAKE_CASE>",
//!   "sourceUserId": 17,
//!   "sourceProviderId": 99,
//!   "payload": { "appointmentId": 42 },
//!   "timestamp": "2026-08-30T12:00:00Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::Payload;

/// Event type tags recognized across services.
///
/// The envelope carries the tag as a plain string so unknown types flow through
/// consumers untouched; these constants exist so producers and handler
/// registrations cannot drift apart by typo.
pub mod event_types {
    pub const USER_REGISTERED: &str = "USER_REGISTERED";
    pub const USER_DELETED: &str = "USER_DELETED";
    pub const APPOINTMENT_CREATED: &str = "APPOINTMENT_CREATED";
    pub const APPOINTMENT_COMPLETED: &str = "APPOINTMENT_COMPLETED";
    pub const APPOINTMENT_CANCELED: &str = "APPOINTMENT_CANCELED";
    pub const REVIEW_CREATED: &str = "REVIEW_CREATED";
    pub const REVIEW_REQUEST: &str = "REVIEW_REQUEST";
    pub const PROVIDER_REPLIED: &str = "PROVIDER_REPLIED";
    pub const ITEM_CREATED: &str = "ITEM_CREATED";
    pub const ITEM_UPDATED: &str = "ITEM_UPDATED";
    pub const ITEM_ARCHIVED: &str = "ITEM_ARCHIVED";
    pub const PLAN_DOWNGRADED: &str = "PLAN_DOWNGRADED";
}

/// Subject prefix shared by every producer; consumers subscribe to
/// `marketplace.events.>` and route by event type.
pub const SUBJECT_PREFIX: &str = "marketplace.events";

/// Build the bus subject for an event type.
pub fn subject_for(event_type: &str) -> String {
    format!("{}.{}", SUBJECT_PREFIX, event_type)
}

/// Standard event envelope wrapping a domain fact for transport across services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique event identifier (idempotency key)
    pub event_id: Uuid,

    /// UPPER_SNAKE_CASE tag identifying the producer fact
    pub event_type: String,

    /// The user the event concerns, when type-relevant
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_user_id: Option<i64>,

    /// The provider the event concerns, when type-relevant
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_provider_id: Option<i64>,

    /// Event-specific data; schema is per event type
    #[serde(default)]
    pub payload: Payload,

    /// Event-creation time, UTC
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Create a new envelope with a freshly assigned `event_id` and timestamp.
    ///
    /// Callers must create the envelope once per logical event and reuse the
    /// same value on retry — never rebuild it — so that redelivery carries the
    /// same idempotency key.
    pub fn new(event_type: &str, payload: Payload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            source_user_id: None,
            source_provider_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create an envelope with an explicit event_id (useful for testing and for
    /// replaying a stored event).
    pub fn with_event_id(event_id: Uuid, event_type: &str, payload: Payload) -> Self {
        Self {
            event_id,
            event_type: event_type.to_string(),
            source_user_id: None,
            source_provider_id: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Set the user the event concerns
    pub fn with_source_user(mut self, user_id: i64) -> Self {
        self.source_user_id = Some(user_id);
        self
    }

    /// Set the provider the event concerns
    pub fn with_source_provider(mut self, provider_id: i64) -> Self {
        self.source_provider_id = Some(provider_id);
        self
    }

    /// Bus subject this envelope publishes to
    pub fn subject(&self) -> String {
        subject_for(&self.event_type)
    }
}

/// Validate a raw envelope against the wire contract.
///
/// # Validation Rules
///
/// - `eventId`: valid UUID
/// - `eventType`: non-empty, UPPER_SNAKE_CASE
/// - `timestamp`: ISO 8601
/// - `payload`: object when present
///
/// `sourceUserId` / `sourceProviderId` are optional integers. Unknown fields
/// are ignored.
pub fn validate_envelope(envelope: &serde_json::Value) -> Result<(), String> {
    let event_id = envelope
        .get("eventId")
        .and_then(|v| v.as_str())
        .ok_or("Missing required field: eventId")?;

    Uuid::parse_str(event_id)
        .map_err(|_| format!("Invalid eventId: must be a valid UUID, got '{}'", event_id))?;

    let event_type = envelope
        .get("eventType")
        .and_then(|v| v.as_str())
        .ok_or("Missing required field: eventType")?;

    if event_type.trim().is_empty() {
        return Err("Invalid eventType: must be non-empty".to_string());
    }

    if !event_type
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(format!(
            "Invalid eventType: must be UPPER_SNAKE_CASE, got '{}'",
            event_type
        ));
    }

    let timestamp = envelope
        .get("timestamp")
        .and_then(|v| v.as_str())
        .ok_or("Missing required field: timestamp")?;

    DateTime::parse_from_rfc3339(timestamp).map_err(|_| {
        format!(
            "Invalid timestamp: must be ISO 8601 timestamp, got '{}'",
            timestamp
        )
    })?;

    if let Some(payload) = envelope.get("payload") {
        if !payload.is_object() && !payload.is_null() {
            return Err("Invalid payload: must be an object".to_string());
        }
    }

    for field in ["sourceUserId", "sourceProviderId"] {
        if let Some(v) = envelope.get(field) {
            if !v.is_i64() && !v.is_null() {
                return Err(format!("Invalid {}: must be an integer or null", field));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_creation_assigns_id_and_timestamp() {
        let envelope = EventEnvelope::new(
            event_types::APPOINTMENT_COMPLETED,
            Payload::new().with("appointmentId", 42i64),
        );

        assert_eq!(envelope.event_type, "APPOINTMENT_COMPLETED");
        assert!(!envelope.event_id.is_nil());
        assert!(envelope.source_user_id.is_none());
        assert!(envelope.source_provider_id.is_none());
    }

    #[test]
    fn test_envelope_wire_format_uses_camel_case() {
        let envelope = EventEnvelope::new(
            event_types::USER_REGISTERED,
            Payload::new().with("role", "PROVIDER"),
        )
        .with_source_user(17);

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("eventId").is_some());
        assert_eq!(json["eventType"], "USER_REGISTERED");
        assert_eq!(json["sourceUserId"], 17);
        // absent optional field is omitted entirely, not null
        assert!(json.get("sourceProviderId").is_none());
        assert_eq!(json["payload"]["role"], "PROVIDER");
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let raw = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "eventType": "USER_REGISTERED",
            "payload": {"role": "PROVIDER", "futureKey": true},
            "timestamp": "2026-08-30T00:00:00Z",
            "schemaVersion": "9.9.9",
            "someNewTopLevel": {"ignored": true}
        });

        let envelope: EventEnvelope = serde_json::from_value(raw).unwrap();
        assert_eq!(envelope.event_type, "USER_REGISTERED");
        assert_eq!(envelope.payload.get_str("role"), Ok("PROVIDER"));
    }

    #[test]
    fn test_decode_tolerates_missing_payload() {
        let raw = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "eventType": "USER_DELETED",
            "timestamp": "2026-08-30T00:00:00Z"
        });

        let envelope: EventEnvelope = serde_json::from_value(raw).unwrap();
        assert!(envelope.payload.is_empty());
    }

    #[test]
    fn test_subject_routing() {
        let envelope = EventEnvelope::new(event_types::ITEM_CREATED, Payload::new());
        assert_eq!(envelope.subject(), "marketplace.events.ITEM_CREATED");
    }

    #[test]
    fn test_validate_envelope_accepts_contract() {
        let envelope = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "eventType": "REVIEW_CREATED",
            "sourceUserId": 3,
            "payload": {"reviewId": 8},
            "timestamp": "2026-08-30T00:00:00Z"
        });

        assert!(validate_envelope(&envelope).is_ok());
    }

    #[test]
    fn test_validate_envelope_rejects_bad_event_id() {
        let envelope = json!({
            "eventId": "not-a-uuid",
            "eventType": "REVIEW_CREATED",
            "timestamp": "2026-08-30T00:00:00Z"
        });

        assert!(validate_envelope(&envelope)
            .unwrap_err()
            .contains("Invalid eventId"));
    }

    #[test]
    fn test_validate_envelope_rejects_lowercase_type() {
        let envelope = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "eventType": "review.created",
            "timestamp": "2026-08-30T00:00:00Z"
        });

        assert!(validate_envelope(&envelope)
            .unwrap_err()
            .contains("UPPER_SNAKE_CASE"));
    }

    #[test]
    fn test_validate_envelope_rejects_bad_timestamp() {
        let envelope = json!({
            "eventId": "550e8400-e29b-41d4-a716-446655440000",
            "eventType": "REVIEW_CREATED",
            "timestamp": "yesterday"
        });

        assert!(validate_envelope(&envelope)
            .unwrap_err()
            .contains("Invalid timestamp"));
    }
}

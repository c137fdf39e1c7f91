use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which aggregate produced an outbox row. Stored as text so the relay can
/// route rows written by newer deployments it does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateType {
    Event,
    Booking,
    Payment,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Event => "EVENT",
            AggregateType::Booking => "BOOKING",
            AggregateType::Payment => "PAYMENT",
        }
    }
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Created,
    Processing,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Created => "CREATED",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(OutboxStatus::Created),
            "PROCESSING" => Some(OutboxStatus::Processing),
            "PROCESSED" => Some(OutboxStatus::Processed),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// One durable domain event, written in the same transaction as the state
/// change it records. Append-only; only the relay mutates status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    /// Bumped on every status change; how the relay spots PROCESSING rows
    /// abandoned by a crashed cycle.
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    pub fn new(
        aggregate_type: AggregateType,
        aggregate_id: String,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.as_str().to_string(),
            aggregate_id,
            event_type: event_type.to_string(),
            payload,
            status: OutboxStatus::Created,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    /// Serialize a full aggregate snapshot (not a delta) and embed the event
    /// type in the payload, so consumers can apply it idempotently.
    pub fn snapshot<T: Serialize>(
        aggregate_type: AggregateType,
        aggregate_id: String,
        event_type: &str,
        aggregate: &T,
    ) -> Result<Self, serde_json::Error> {
        let mut payload = serde_json::to_value(aggregate)?;
        if let Some(object) = payload.as_object_mut() {
            object.insert("event_type".to_string(), serde_json::Value::String(event_type.to_string()));
        }
        Ok(Self::new(aggregate_type, aggregate_id, event_type, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_starts_created_with_zero_retries() {
        let message = OutboxMessage::new(
            AggregateType::Booking,
            "abc".to_string(),
            "BOOKING_CREATED",
            serde_json::json!({}),
        );

        assert_eq!(message.status, OutboxStatus::Created);
        assert_eq!(message.retry_count, 0);
        assert!(message.processed_at.is_none());
        assert_eq!(message.aggregate_type, "BOOKING");
    }

    #[test]
    fn snapshot_embeds_event_type_in_payload() {
        #[derive(Serialize)]
        struct Doc {
            name: &'static str,
        }

        let message = OutboxMessage::snapshot(
            AggregateType::Event,
            "id-1".to_string(),
            "EVENT_PUBLISHED",
            &Doc { name: "Rust Conf" },
        )
        .unwrap();

        assert_eq!(message.payload["name"], "Rust Conf");
        assert_eq!(message.payload["event_type"], "EVENT_PUBLISHED");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::outbox::{AggregateType, OutboxMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Expired,
    Refunded,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
            BookingStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BookingStatus::Pending),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "EXPIRED" => Some(BookingStatus::Expired),
            "REFUNDED" => Some(BookingStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A price-snapshotted line within a booking. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingItem {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
}

impl BookingItem {
    pub fn new(booking_id: Uuid, ticket_type_id: Uuid, quantity: i32, unit_price: i64) -> Result<Self, DomainError> {
        if quantity < 1 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            booking_id,
            ticket_type_id,
            quantity,
            unit_price,
            total_price: unit_price * quantity as i64,
        })
    }
}

/// Aggregate root for a reservation. Owns its items; a payment may reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub booking_number: String,
    pub event_id: Uuid,
    pub user_id: String,
    pub total_amount: i64,
    pub status: BookingStatus,
    pub expires_at: DateTime<Utc>,
    pub items: Vec<BookingItem>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Start a PENDING booking shell; items are attached via `attach_item`
    /// as each ticket type is reserved.
    pub fn new(event_id: Uuid, user_id: String, hold: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_number: generate_booking_number(now),
            event_id,
            user_id,
            total_amount: 0,
            status: BookingStatus::Pending,
            expires_at: now + hold,
            items: Vec::new(),
            created_at: now,
        }
    }

    pub fn attach_item(&mut self, item: BookingItem) {
        self.total_amount += item.total_price;
        self.items.push(item);
    }

    pub fn owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Total tickets across all items; the quantity held against the event's
    /// seat counter.
    pub fn ticket_count(&self) -> i32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// PENDING -> CONFIRMED, only before the hold deadline.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != BookingStatus::Pending {
            return Err(self.invalid_transition(BookingStatus::Confirmed));
        }
        if self.expires_at < now {
            return Err(DomainError::BookingExpired);
        }
        self.status = BookingStatus::Confirmed;
        Ok(())
    }

    /// PENDING|CONFIRMED -> CANCELLED. The caller releases inventory exactly
    /// once, in the same transaction.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        if self.status != BookingStatus::Pending && self.status != BookingStatus::Confirmed {
            return Err(self.invalid_transition(BookingStatus::Cancelled));
        }
        self.status = BookingStatus::Cancelled;
        Ok(())
    }

    /// PENDING past deadline -> EXPIRED. The status guard is what makes a
    /// racing confirm/expire pair settle on whichever committed first.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != BookingStatus::Pending {
            return Err(self.invalid_transition(BookingStatus::Expired));
        }
        if self.expires_at >= now {
            return Err(DomainError::InvalidTransition {
                from: "PENDING".into(),
                to: "EXPIRED".into(),
            });
        }
        self.status = BookingStatus::Expired;
        Ok(())
    }

    /// CONFIRMED -> REFUNDED, driven by the payment refund flow.
    pub fn mark_refunded(&mut self) -> Result<(), DomainError> {
        if self.status != BookingStatus::Confirmed {
            return Err(self.invalid_transition(BookingStatus::Refunded));
        }
        self.status = BookingStatus::Refunded;
        Ok(())
    }

    /// Snapshot this booking into an outbox row for the given event type.
    pub fn outbox_message(&self, event_type: &str) -> Result<OutboxMessage, serde_json::Error> {
        OutboxMessage::snapshot(AggregateType::Booking, self.id.to_string(), event_type, self)
    }

    fn invalid_transition(&self, to: BookingStatus) -> DomainError {
        DomainError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

fn generate_booking_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("BK-{}-{}", now.timestamp_millis(), &suffix[..8])
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub event_id: Uuid,
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemRequest {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_booking() -> Booking {
        let mut booking = Booking::new(Uuid::new_v4(), "user-1".to_string(), Duration::minutes(15));
        let item = BookingItem::new(booking.id, Uuid::new_v4(), 2, 2_500).unwrap();
        booking.attach_item(item);
        booking
    }

    #[test]
    fn total_amount_equals_sum_of_item_totals() {
        let mut booking = pending_booking();
        let item = BookingItem::new(booking.id, Uuid::new_v4(), 3, 1_000).unwrap();
        booking.attach_item(item);

        assert_eq!(booking.total_amount, 2 * 2_500 + 3 * 1_000);
        assert_eq!(booking.ticket_count(), 5);
    }

    #[test]
    fn confirm_from_pending_before_deadline() {
        let mut booking = pending_booking();
        booking.confirm(Utc::now()).unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }

    #[test]
    fn confirm_after_deadline_is_rejected() {
        let mut booking = pending_booking();
        booking.expires_at = Utc::now() - Duration::minutes(1);

        assert!(matches!(booking.confirm(Utc::now()), Err(DomainError::BookingExpired)));
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[test]
    fn cancel_from_pending_and_confirmed_only() {
        let mut booking = pending_booking();
        booking.cancel().unwrap();
        assert_eq!(booking.status, BookingStatus::Cancelled);

        // Second cancel hits the status guard.
        assert!(booking.cancel().is_err());
    }

    #[test]
    fn expire_requires_pending_and_past_deadline() {
        let mut booking = pending_booking();
        assert!(booking.expire(Utc::now()).is_err());

        booking.expires_at = Utc::now() - Duration::minutes(1);
        booking.expire(Utc::now()).unwrap();
        assert_eq!(booking.status, BookingStatus::Expired);
    }

    #[test]
    fn expire_on_confirmed_booking_is_rejected() {
        let mut booking = pending_booking();
        booking.confirm(Utc::now()).unwrap();
        booking.expires_at = Utc::now() - Duration::minutes(1);

        assert!(matches!(
            booking.expire(Utc::now()),
            Err(DomainError::InvalidTransition { .. })
        ));
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }

    #[test]
    fn refund_only_from_confirmed() {
        let mut booking = pending_booking();
        assert!(booking.mark_refunded().is_err());

        booking.confirm(Utc::now()).unwrap();
        booking.mark_refunded().unwrap();
        assert_eq!(booking.status, BookingStatus::Refunded);
    }

    #[test]
    fn booking_item_rejects_zero_quantity() {
        assert!(BookingItem::new(Uuid::new_v4(), Uuid::new_v4(), 0, 100).is_err());
    }

    #[test]
    fn booking_number_has_expected_shape() {
        let booking = pending_booking();
        assert!(booking.booking_number.starts_with("BK-"));
        assert_eq!(booking.booking_number.split('-').count(), 3);
    }

    #[test]
    fn outbox_snapshot_carries_event_type_and_status() {
        let booking = pending_booking();
        let message = booking.outbox_message("BOOKING_CREATED").unwrap();

        assert_eq!(message.aggregate_id, booking.id.to_string());
        assert_eq!(message.event_type, "BOOKING_CREATED");
        assert_eq!(message.payload["event_type"], "BOOKING_CREATED");
        assert_eq!(message.payload["status"], "PENDING");
    }
}

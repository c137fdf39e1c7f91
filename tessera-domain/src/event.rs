use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::outbox::{AggregateType, OutboxMessage};

/// A sellable event. `available_seats` mirrors the sum of its ticket types'
/// availability and must be mutated under the same lock scope as them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub total_seats: i32,
    pub available_seats: i32,
    pub base_price: i64,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        name: String,
        description: Option<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        total_seats: i32,
        base_price: i64,
    ) -> Result<Self, DomainError> {
        if total_seats < 1 {
            return Err(DomainError::InvalidQuantity(total_seats));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            description,
            start_date,
            end_date,
            total_seats,
            available_seats: total_seats,
            base_price,
            published: false,
            created_at: Utc::now(),
        })
    }

    /// Guard for the create-booking path: published, not yet started, seats left.
    pub fn validate_bookable(&self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.published {
            return Err(DomainError::NotBookable("event is not published".into()));
        }
        if self.start_date < now {
            return Err(DomainError::NotBookable("event has already started".into()));
        }
        if self.available_seats <= 0 {
            return Err(DomainError::NotBookable("event is sold out".into()));
        }
        Ok(())
    }

    pub fn publish(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.published {
            return Err(DomainError::InvalidTransition {
                from: "PUBLISHED".into(),
                to: "PUBLISHED".into(),
            });
        }
        if self.start_date < now {
            return Err(DomainError::NotBookable(
                "cannot publish an event with a past start date".into(),
            ));
        }
        self.published = true;
        Ok(())
    }

    pub fn reserve_seats(&mut self, qty: i32) -> Result<(), DomainError> {
        if qty < 1 {
            return Err(DomainError::InvalidQuantity(qty));
        }
        if self.available_seats < qty {
            return Err(DomainError::InsufficientInventory {
                requested: qty,
                available: self.available_seats,
            });
        }
        self.available_seats -= qty;
        Ok(())
    }

    pub fn release_seats(&mut self, qty: i32) -> Result<(), DomainError> {
        if self.available_seats + qty > self.total_seats {
            return Err(DomainError::ReleaseOverflow {
                requested: qty,
                capacity: self.total_seats,
            });
        }
        self.available_seats += qty;
        Ok(())
    }

    /// Apply an admin edit. A published event cannot go back to draft;
    /// flipping a draft to published runs the same guard as `publish`.
    pub fn apply_update(&mut self, update: &UpdateEventRequest, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.published && !update.published {
            return Err(DomainError::InvalidTransition {
                from: "PUBLISHED".into(),
                to: "DRAFT".into(),
            });
        }
        self.name = update.name.clone();
        self.description = update.description.clone();
        self.start_date = update.start_date;
        self.end_date = update.end_date;
        self.base_price = update.base_price;
        if update.published && !self.published {
            self.publish(now)?;
        }
        Ok(())
    }

    /// Only draft events may be deleted; published ones may have sold tickets.
    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if self.published {
            return Err(DomainError::InvalidTransition {
                from: "PUBLISHED".into(),
                to: "DELETED".into(),
            });
        }
        Ok(())
    }

    pub fn outbox_message(&self, event_type: &str) -> Result<OutboxMessage, serde_json::Error> {
        OutboxMessage::snapshot(AggregateType::Event, self.id.to_string(), event_type, self)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub base_price: i64,
    pub published: bool,
}

/// A ticket tier within an event. `available` is bounded by `quantity` and
/// only ever moves through `reserve` and `release`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketType {
    pub id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i32,
    pub available: i32,
}

impl TicketType {
    pub fn new(event_id: Uuid, name: String, description: Option<String>, price: i64, quantity: i32) -> Result<Self, DomainError> {
        if quantity < 1 {
            return Err(DomainError::InvalidQuantity(quantity));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            event_id,
            name,
            description,
            price,
            quantity,
            available: quantity,
        })
    }

    /// Decrement availability. Fails without mutating when not enough is left.
    pub fn reserve(&mut self, qty: i32) -> Result<(), DomainError> {
        if qty < 1 {
            return Err(DomainError::InvalidQuantity(qty));
        }
        if self.available < qty {
            return Err(DomainError::InsufficientInventory {
                requested: qty,
                available: self.available,
            });
        }
        self.available -= qty;
        Ok(())
    }

    /// Return previously reserved quantity. Never raises `available` above `quantity`.
    pub fn release(&mut self, qty: i32) -> Result<(), DomainError> {
        if self.available + qty > self.quantity {
            return Err(DomainError::ReleaseOverflow {
                requested: qty,
                capacity: self.quantity,
            });
        }
        self.available += qty;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn future_event() -> Event {
        let mut event = Event::new(
            "Rust Conf".to_string(),
            None,
            Utc::now() + Duration::days(30),
            Utc::now() + Duration::days(31),
            100,
            5_000,
        )
        .unwrap();
        event.published = true;
        event
    }

    #[test]
    fn reserve_then_release_restores_availability() {
        let mut tt = TicketType::new(Uuid::new_v4(), "GA".to_string(), None, 2_500, 10).unwrap();

        tt.reserve(4).unwrap();
        assert_eq!(tt.available, 6);

        tt.release(4).unwrap();
        assert_eq!(tt.available, 10);
    }

    #[test]
    fn reserve_fails_without_mutating_when_insufficient() {
        let mut tt = TicketType::new(Uuid::new_v4(), "GA".to_string(), None, 2_500, 3).unwrap();

        let err = tt.reserve(5).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientInventory { requested: 5, available: 3 }
        ));
        assert_eq!(tt.available, 3);
    }

    #[test]
    fn release_never_exceeds_total_quantity() {
        let mut tt = TicketType::new(Uuid::new_v4(), "GA".to_string(), None, 2_500, 3).unwrap();

        tt.reserve(1).unwrap();
        assert!(tt.release(3).is_err());
        assert_eq!(tt.available, 2);
    }

    #[test]
    fn unpublished_event_is_not_bookable() {
        let mut event = future_event();
        event.published = false;

        assert!(matches!(
            event.validate_bookable(Utc::now()),
            Err(DomainError::NotBookable(_))
        ));
    }

    #[test]
    fn started_event_is_not_bookable() {
        let mut event = future_event();
        event.start_date = Utc::now() - Duration::hours(1);

        assert!(event.validate_bookable(Utc::now()).is_err());
    }

    #[test]
    fn sold_out_event_is_not_bookable() {
        let mut event = future_event();
        event.available_seats = 0;

        assert!(event.validate_bookable(Utc::now()).is_err());
    }

    #[test]
    fn publish_rejects_past_start_date() {
        let mut event = future_event();
        event.published = false;
        event.start_date = Utc::now() - Duration::hours(1);

        assert!(event.publish(Utc::now()).is_err());
        assert!(!event.published);
    }

    #[test]
    fn construction_rejects_nonpositive_quantities() {
        assert!(matches!(
            TicketType::new(Uuid::new_v4(), "GA".to_string(), None, 2_500, -5),
            Err(DomainError::InvalidQuantity(-5))
        ));
        assert!(matches!(
            TicketType::new(Uuid::new_v4(), "GA".to_string(), None, 2_500, 0),
            Err(DomainError::InvalidQuantity(0))
        ));
        assert!(Event::new(
            "Rust Conf".to_string(),
            None,
            Utc::now() + Duration::days(30),
            Utc::now() + Duration::days(31),
            -10,
            5_000,
        )
        .is_err());
    }

    fn edit_of(event: &Event) -> UpdateEventRequest {
        UpdateEventRequest {
            name: event.name.clone(),
            description: event.description.clone(),
            start_date: event.start_date,
            end_date: event.end_date,
            base_price: event.base_price,
            published: event.published,
        }
    }

    #[test]
    fn update_cannot_unpublish() {
        let mut event = future_event();
        let mut edit = edit_of(&event);
        edit.published = false;

        assert!(matches!(
            event.apply_update(&edit, Utc::now()),
            Err(DomainError::InvalidTransition { .. })
        ));
        assert!(event.published);
    }

    #[test]
    fn update_can_publish_a_draft() {
        let mut event = future_event();
        event.published = false;
        let mut edit = edit_of(&event);
        edit.published = true;
        edit.base_price = 7_500;

        event.apply_update(&edit, Utc::now()).unwrap();
        assert!(event.published);
        assert_eq!(event.base_price, 7_500);
    }

    #[test]
    fn only_draft_events_are_deletable() {
        let mut event = future_event();
        assert!(event.ensure_deletable().is_err());

        event.published = false;
        assert!(event.ensure_deletable().is_ok());
    }

    #[test]
    fn seat_counter_round_trip() {
        let mut event = future_event();
        event.reserve_seats(10).unwrap();
        assert_eq!(event.available_seats, 90);
        event.release_seats(10).unwrap();
        assert_eq!(event.available_seats, 100);
        assert!(event.release_seats(1).is_err());
    }
}

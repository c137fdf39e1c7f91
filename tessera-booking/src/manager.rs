use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use tessera_core::{BookingStore, BookingTransition, CoreError, PageRequest};
use tessera_domain::{Booking, CreateBookingRequest, DomainError};

/// Orchestrates the reservation lifecycle. Validation and ownership checks
/// live here; the atomic reserve/release work happens inside the store,
/// under its row locks.
pub struct ReservationManager {
    bookings: Arc<dyn BookingStore>,
    hold: Duration,
}

impl ReservationManager {
    pub fn new(bookings: Arc<dyn BookingStore>, hold: Duration) -> Self {
        Self { bookings, hold }
    }

    /// Reserve seats for a user. The resulting booking is PENDING and holds
    /// its inventory until confirmed, cancelled or expired.
    pub async fn create(&self, user_id: &str, request: &CreateBookingRequest) -> Result<Booking, CoreError> {
        if request.items.is_empty() {
            return Err(DomainError::InvalidQuantity(0).into());
        }
        for item in &request.items {
            if item.quantity < 1 {
                return Err(DomainError::InvalidQuantity(item.quantity).into());
            }
        }

        let booking = self.bookings.create_booking(request, user_id, self.hold).await?;
        info!(
            booking_id = %booking.id,
            booking_number = %booking.booking_number,
            event_id = %booking.event_id,
            tickets = booking.ticket_count(),
            "booking created"
        );
        Ok(booking)
    }

    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<Booking, CoreError> {
        let booking = self.bookings.get_booking(id).await?;
        self.check_owner(&booking, user_id)?;
        Ok(booking)
    }

    pub async fn list(&self, user_id: &str, page: PageRequest) -> Result<Vec<Booking>, CoreError> {
        self.bookings.list_bookings(user_id, page).await
    }

    pub async fn confirm(&self, user_id: &str, id: Uuid) -> Result<Booking, CoreError> {
        let booking = self.bookings.get_booking(id).await?;
        self.check_owner(&booking, user_id)?;

        let booking = self
            .bookings
            .finalize_booking(id, BookingTransition::Confirm, Utc::now())
            .await?;
        info!(booking_id = %booking.id, "booking confirmed");
        Ok(booking)
    }

    pub async fn cancel(&self, user_id: &str, id: Uuid) -> Result<Booking, CoreError> {
        let booking = self.bookings.get_booking(id).await?;
        self.check_owner(&booking, user_id)?;

        let booking = self
            .bookings
            .finalize_booking(id, BookingTransition::Cancel, Utc::now())
            .await?;
        info!(booking_id = %booking.id, "booking cancelled");
        Ok(booking)
    }

    fn check_owner(&self, booking: &Booking, user_id: &str) -> Result<(), CoreError> {
        if !booking.owned_by(user_id) {
            return Err(CoreError::Unauthorized("booking belongs to another user".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::EventStore;
    use tessera_domain::{BookingStatus, Event, ItemRequest, TicketType};
    use tessera_store::MemoryStore;

    async fn seed(store: &MemoryStore, capacity: i32) -> (Event, TicketType) {
        let event = Event::new(
            "Rust Conf".to_string(),
            None,
            Utc::now() + Duration::days(30),
            Utc::now() + Duration::days(31),
            capacity,
            5_000,
        )
        .unwrap();
        let tt = TicketType::new(event.id, "GA".to_string(), None, 2_500, capacity).unwrap();
        store.create_event(event.clone(), vec![tt.clone()]).await.unwrap();
        let event = store.publish_event(event.id).await.unwrap();
        (event, tt)
    }

    fn manager(store: &MemoryStore) -> ReservationManager {
        ReservationManager::new(Arc::new(store.clone()), Duration::minutes(15))
    }

    fn request(event_id: Uuid, ticket_type_id: Uuid, quantity: i32) -> CreateBookingRequest {
        CreateBookingRequest {
            event_id,
            items: vec![ItemRequest { ticket_type_id, quantity }],
        }
    }

    #[tokio::test]
    async fn create_confirm_flow() {
        let store = MemoryStore::new();
        let (event, tt) = seed(&store, 10).await;
        let manager = manager(&store);

        let booking = manager.create("user-1", &request(event.id, tt.id, 2)).await.unwrap();
        let booking = manager.confirm("user-1", booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn empty_booking_is_rejected() {
        let store = MemoryStore::new();
        let (event, _tt) = seed(&store, 10).await;
        let manager = manager(&store);

        let err = manager
            .create("user-1", &CreateBookingRequest { event_id: event.id, items: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientInventory { .. }));
    }

    #[tokio::test]
    async fn other_users_cannot_touch_a_booking() {
        let store = MemoryStore::new();
        let (event, tt) = seed(&store, 10).await;
        let manager = manager(&store);

        let booking = manager.create("user-1", &request(event.id, tt.id, 1)).await.unwrap();

        assert!(matches!(
            manager.get("user-2", booking.id).await,
            Err(CoreError::Unauthorized(_))
        ));
        assert!(matches!(
            manager.cancel("user-2", booking.id).await,
            Err(CoreError::Unauthorized(_))
        ));
        // Still PENDING for its owner.
        let booking = manager.get("user-1", booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn cancelling_frees_capacity_for_a_new_booking() {
        let store = MemoryStore::new();
        let (event, tt) = seed(&store, 1).await;
        let manager = manager(&store);

        let first = manager.create("user-1", &request(event.id, tt.id, 1)).await.unwrap();
        assert!(manager.create("user-2", &request(event.id, tt.id, 1)).await.is_err());

        manager.cancel("user-1", first.id).await.unwrap();
        let second = manager.create("user-2", &request(event.id, tt.id, 1)).await.unwrap();
        assert_eq!(second.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_bookings_never_oversell() {
        let store = MemoryStore::new();
        let (event, tt) = seed(&store, 1).await;
        let manager = Arc::new(manager(&store));

        let mut handles = Vec::new();
        for i in 0..4 {
            let manager = Arc::clone(&manager);
            let request = request(event.id, tt.id, 1);
            handles.push(tokio::spawn(async move {
                manager.create(&format!("user-{i}"), &request).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                won += 1;
            }
        }
        assert_eq!(won, 1);
        assert_eq!(store.get_ticket_type(tt.id).await.unwrap().available, 0);
    }

    #[tokio::test]
    async fn list_is_scoped_to_the_user() {
        let store = MemoryStore::new();
        let (event, tt) = seed(&store, 10).await;
        let manager = manager(&store);

        manager.create("user-1", &request(event.id, tt.id, 1)).await.unwrap();
        manager.create("user-1", &request(event.id, tt.id, 1)).await.unwrap();
        manager.create("user-2", &request(event.id, tt.id, 1)).await.unwrap();

        let mine = manager.list("user-1", PageRequest::default()).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|b| b.user_id == "user-1"));
    }
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tessera_core::{BookingStore, BookingTransition, CoreError};

/// Background worker that expires PENDING bookings past their hold
/// deadline, returning their seats to the pool.
pub struct ExpirySweeper {
    bookings: Arc<dyn BookingStore>,
    interval: Duration,
    batch_size: usize,
}

impl ExpirySweeper {
    pub fn new(bookings: Arc<dyn BookingStore>, interval: Duration, batch_size: usize) -> Self {
        Self { bookings, interval, batch_size }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(expired) => info!(expired, "expired stale bookings"),
                        Err(err) => warn!(%err, "expiry sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("expiry sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over due bookings. Each expiry is its own transaction, so a
    /// failure on one booking does not hold up the rest; a booking confirmed
    /// since the scan simply loses the race and is skipped.
    pub async fn sweep_once(&self) -> Result<usize, CoreError> {
        let now = Utc::now();
        let due = self.bookings.expired_pending(now, self.batch_size).await?;

        let mut expired = 0;
        for id in due {
            match self
                .bookings
                .finalize_booking(id, BookingTransition::Expire, now)
                .await
            {
                Ok(_) => expired += 1,
                Err(CoreError::InvalidTransition { .. }) => {
                    debug!(booking_id = %id, "booking settled before expiry");
                }
                Err(err) => warn!(booking_id = %id, %err, "failed to expire booking"),
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tessera_core::EventStore;
    use tessera_domain::{BookingStatus, CreateBookingRequest, Event, ItemRequest, TicketType};
    use tessera_store::MemoryStore;
    use uuid::Uuid;

    async fn seed_booking(store: &MemoryStore) -> (Uuid, Uuid) {
        let event = Event::new(
            "Rust Conf".to_string(),
            None,
            Utc::now() + ChronoDuration::days(30),
            Utc::now() + ChronoDuration::days(31),
            10,
            5_000,
        )
        .unwrap();
        let tt = TicketType::new(event.id, "GA".to_string(), None, 2_500, 10).unwrap();
        store.create_event(event.clone(), vec![tt.clone()]).await.unwrap();
        store.publish_event(event.id).await.unwrap();

        let booking = store
            .create_booking(
                &CreateBookingRequest {
                    event_id: event.id,
                    items: vec![ItemRequest { ticket_type_id: tt.id, quantity: 2 }],
                },
                "user-1",
                ChronoDuration::minutes(15),
            )
            .await
            .unwrap();
        (booking.id, tt.id)
    }

    fn sweeper(store: &MemoryStore) -> ExpirySweeper {
        ExpirySweeper::new(Arc::new(store.clone()), Duration::from_secs(60), 100)
    }

    #[tokio::test]
    async fn sweep_expires_overdue_bookings_and_releases_seats() {
        let store = MemoryStore::new();
        let (booking_id, tt_id) = seed_booking(&store).await;
        store.backdate_booking(booking_id, Utc::now() - ChronoDuration::minutes(1)).await;

        let expired = sweeper(&store).sweep_once().await.unwrap();
        assert_eq!(expired, 1);

        let booking = store.get_booking(booking_id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Expired);
        assert_eq!(store.get_ticket_type(tt_id).await.unwrap().available, 10);

        let types: Vec<String> = store
            .outbox_snapshot()
            .await
            .into_iter()
            .map(|m| m.event_type)
            .collect();
        assert!(types.contains(&"BOOKING_EXPIRED".to_string()));
    }

    #[tokio::test]
    async fn sweep_leaves_unexpired_and_confirmed_bookings_alone() {
        let store = MemoryStore::new();
        let (pending_id, tt_id) = seed_booking(&store).await;

        let (confirmed_id, _) = seed_booking(&store).await;
        store
            .finalize_booking(confirmed_id, BookingTransition::Confirm, Utc::now())
            .await
            .unwrap();
        store.backdate_booking(confirmed_id, Utc::now() - ChronoDuration::minutes(1)).await;

        let expired = sweeper(&store).sweep_once().await.unwrap();
        assert_eq!(expired, 0);

        assert_eq!(store.get_booking(pending_id).await.unwrap().status, BookingStatus::Pending);
        assert_eq!(store.get_booking(confirmed_id).await.unwrap().status, BookingStatus::Confirmed);
        // Confirmed booking keeps its seats reserved.
        assert_eq!(store.get_ticket_type(tt_id).await.unwrap().available, 8);
    }
}

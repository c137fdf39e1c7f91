use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use tessera_core::{
    BookingStore, BookingTransition, CoreError, EventStore, OutboxStore, PageRequest, PaymentStore,
};
use tessera_domain::{
    Booking, BookingItem, BookingStatus, CreateBookingRequest, Event, OutboxMessage, OutboxStatus,
    Payment, TicketType, UpdateEventRequest,
};

#[derive(Default)]
struct State {
    events: HashMap<Uuid, Event>,
    ticket_types: HashMap<Uuid, TicketType>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<Uuid, Payment>,
    outbox: Vec<OutboxMessage>,
}

/// In-memory backend with the same observable semantics as the Postgres
/// stores. One mutex serializes every transaction, which is exactly what
/// row locks buy the database path: each method sees a consistent snapshot
/// and either commits all of its writes or none of them (mutations happen
/// on clones and are written back only after every guard has passed).
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: all outbox rows in insertion order.
    pub async fn outbox_snapshot(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }

    /// Test hook: rewrite a booking's hold deadline.
    pub async fn backdate_booking(&self, id: Uuid, expires_at: DateTime<Utc>) {
        if let Some(booking) = self.state.lock().await.bookings.get_mut(&id) {
            booking.expires_at = expires_at;
        }
    }
}

fn release_inventory(state: &mut State, booking: &Booking) -> Result<(), CoreError> {
    let mut event = state
        .events
        .get(&booking.event_id)
        .cloned()
        .ok_or_else(|| CoreError::not_found("event", booking.event_id))?;

    let mut updated: Vec<TicketType> = Vec::with_capacity(booking.items.len());
    for item in &booking.items {
        // Two items on the same tier must release into one working copy,
        // or the later write-back would drop the earlier release.
        let pos = match updated.iter().position(|t| t.id == item.ticket_type_id) {
            Some(pos) => pos,
            None => {
                let tt = state
                    .ticket_types
                    .get(&item.ticket_type_id)
                    .cloned()
                    .ok_or_else(|| CoreError::not_found("ticket type", item.ticket_type_id))?;
                updated.push(tt);
                updated.len() - 1
            }
        };
        updated[pos].release(item.quantity)?;
    }
    event.release_seats(booking.ticket_count())?;

    for tt in updated {
        state.ticket_types.insert(tt.id, tt);
    }
    state.events.insert(event.id, event);
    Ok(())
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn create_event(&self, event: Event, ticket_types: Vec<TicketType>) -> Result<Event, CoreError> {
        let mut state = self.state.lock().await;

        let message = event.outbox_message("EVENT_CREATED")?;
        for tt in ticket_types {
            state.ticket_types.insert(tt.id, tt);
        }
        state.events.insert(event.id, event.clone());
        state.outbox.push(message);
        Ok(event)
    }

    async fn get_event(&self, id: Uuid) -> Result<Event, CoreError> {
        self.state
            .lock()
            .await
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("event", id))
    }

    async fn list_published(&self, page: PageRequest) -> Result<Vec<Event>, CoreError> {
        let state = self.state.lock().await;
        let mut events: Vec<Event> = state.events.values().filter(|e| e.published).cloned().collect();
        events.sort_by_key(|e| e.start_date);
        Ok(events
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }

    async fn publish_event(&self, id: Uuid) -> Result<Event, CoreError> {
        let mut state = self.state.lock().await;

        let mut event = state
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("event", id))?;
        event.publish(Utc::now())?;

        let message = event.outbox_message("EVENT_PUBLISHED")?;
        state.events.insert(event.id, event.clone());
        state.outbox.push(message);
        Ok(event)
    }

    async fn update_event(&self, id: Uuid, update: &UpdateEventRequest) -> Result<Event, CoreError> {
        let mut state = self.state.lock().await;

        let mut event = state
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("event", id))?;
        event.apply_update(update, Utc::now())?;

        let message = event.outbox_message("EVENT_UPDATED")?;
        state.events.insert(event.id, event.clone());
        state.outbox.push(message);
        Ok(event)
    }

    async fn delete_event(&self, id: Uuid) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;

        let event = state
            .events
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("event", id))?;
        event.ensure_deletable()?;

        let message = event.outbox_message("EVENT_DELETED")?;
        state.events.remove(&id);
        state.ticket_types.retain(|_, tt| tt.event_id != id);
        state.outbox.push(message);
        Ok(())
    }

    async fn get_ticket_type(&self, id: Uuid) -> Result<TicketType, CoreError> {
        self.state
            .lock()
            .await
            .ticket_types
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("ticket type", id))
    }

    async fn list_ticket_types(&self, event_id: Uuid) -> Result<Vec<TicketType>, CoreError> {
        let state = self.state.lock().await;
        let mut ticket_types: Vec<TicketType> = state
            .ticket_types
            .values()
            .filter(|tt| tt.event_id == event_id)
            .cloned()
            .collect();
        ticket_types.sort_by_key(|tt| tt.price);
        Ok(ticket_types)
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn create_booking(
        &self,
        request: &CreateBookingRequest,
        user_id: &str,
        hold: Duration,
    ) -> Result<Booking, CoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let mut event = state
            .events
            .get(&request.event_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("event", request.event_id))?;
        event.validate_bookable(now)?;

        let mut requested = request.items.clone();
        requested.sort_by_key(|i| i.ticket_type_id);

        let mut booking = Booking::new(request.event_id, user_id.to_string(), hold);
        let mut reserved: Vec<TicketType> = Vec::with_capacity(requested.len());
        for item in &requested {
            // Re-reserve from the working copy when the request names the
            // same ticket type twice.
            let mut tt = match reserved.iter().position(|t| t.id == item.ticket_type_id) {
                Some(idx) => reserved.remove(idx),
                None => state
                    .ticket_types
                    .get(&item.ticket_type_id)
                    .cloned()
                    .ok_or_else(|| CoreError::not_found("ticket type", item.ticket_type_id))?,
            };
            if tt.event_id != event.id {
                return Err(CoreError::EventNotBookable(
                    "ticket type does not belong to this event".into(),
                ));
            }
            tt.reserve(item.quantity)?;
            booking.attach_item(BookingItem::new(booking.id, tt.id, item.quantity, tt.price)?);
            reserved.push(tt);
        }
        event.reserve_seats(booking.ticket_count())?;

        let message = booking.outbox_message("BOOKING_CREATED")?;
        for tt in reserved {
            state.ticket_types.insert(tt.id, tt);
        }
        state.events.insert(event.id, event);
        state.bookings.insert(booking.id, booking.clone());
        state.outbox.push(message);
        Ok(booking)
    }

    async fn get_booking(&self, id: Uuid) -> Result<Booking, CoreError> {
        self.state
            .lock()
            .await
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("booking", id))
    }

    async fn list_bookings(&self, user_id: &str, page: PageRequest) -> Result<Vec<Booking>, CoreError> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }

    async fn finalize_booking(
        &self,
        id: Uuid,
        transition: BookingTransition,
        now: DateTime<Utc>,
    ) -> Result<Booking, CoreError> {
        let mut state = self.state.lock().await;

        let mut booking = state
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("booking", id))?;

        let event_type = match transition {
            BookingTransition::Confirm => {
                booking.confirm(now)?;
                "BOOKING_CONFIRMED"
            }
            BookingTransition::Cancel => {
                booking.cancel()?;
                release_inventory(&mut state, &booking)?;
                "BOOKING_CANCELLED"
            }
            BookingTransition::Expire => {
                booking.expire(now)?;
                release_inventory(&mut state, &booking)?;
                "BOOKING_EXPIRED"
            }
        };

        let message = booking.outbox_message(event_type)?;
        state.bookings.insert(booking.id, booking.clone());
        state.outbox.push(message);
        Ok(booking)
    }

    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, CoreError> {
        let state = self.state.lock().await;
        let mut expired: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending && b.expires_at < now)
            .collect();
        expired.sort_by_key(|b| b.expires_at);
        Ok(expired.into_iter().take(limit).map(|b| b.id).collect())
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, CoreError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let booking = state
            .bookings
            .get(&payment.booking_id)
            .ok_or_else(|| CoreError::not_found("booking", payment.booking_id))?;
        if booking.status != BookingStatus::Pending {
            return Err(CoreError::InvalidTransition {
                from: booking.status.to_string(),
                to: BookingStatus::Confirmed.to_string(),
            });
        }
        if booking.expires_at < now {
            return Err(tessera_domain::DomainError::BookingExpired.into());
        }
        if state.payments.values().any(|p| p.booking_id == payment.booking_id) {
            return Err(CoreError::DuplicatePayment(payment.booking_id));
        }

        let message = payment.outbox_message("PAYMENT_INITIATED")?;
        state.payments.insert(payment.id, payment.clone());
        state.outbox.push(message);
        Ok(payment)
    }

    async fn record_gateway_transaction(&self, id: Uuid, gateway_tx: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("payment", id))?;
        payment.gateway_transaction_id = Some(gateway_tx.to_string());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, CoreError> {
        self.state
            .lock()
            .await
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("payment", id))
    }

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Payment, CoreError> {
        self.state
            .lock()
            .await
            .payments
            .values()
            .find(|p| p.payment_reference == reference)
            .cloned()
            .ok_or_else(|| CoreError::not_found("payment", reference))
    }

    async fn complete_payment(
        &self,
        reference: &str,
        gateway_tx: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<Payment, CoreError> {
        let mut state = self.state.lock().await;

        let mut payment = state
            .payments
            .values()
            .find(|p| p.payment_reference == reference)
            .cloned()
            .ok_or_else(|| CoreError::not_found("payment", reference))?;

        if success {
            payment.complete(gateway_tx.to_string(), now)?;
            let mut booking = state
                .bookings
                .get(&payment.booking_id)
                .cloned()
                .ok_or_else(|| CoreError::not_found("booking", payment.booking_id))?;
            // If the hold already lapsed this fails before anything is
            // written back, leaving the payment PENDING.
            booking.confirm(now)?;

            let payment_message = payment.outbox_message("PAYMENT_COMPLETED")?;
            let booking_message = booking.outbox_message("BOOKING_CONFIRMED")?;
            state.bookings.insert(booking.id, booking);
            state.payments.insert(payment.id, payment.clone());
            state.outbox.push(payment_message);
            state.outbox.push(booking_message);
        } else {
            payment.fail(Some(gateway_tx.to_string()))?;
            let message = payment.outbox_message("PAYMENT_FAILED")?;
            state.payments.insert(payment.id, payment.clone());
            state.outbox.push(message);
        }

        Ok(payment)
    }

    async fn fail_payment(&self, id: Uuid) -> Result<Payment, CoreError> {
        let mut state = self.state.lock().await;

        let mut payment = state
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("payment", id))?;
        payment.fail(None)?;

        let message = payment.outbox_message("PAYMENT_FAILED")?;
        state.payments.insert(payment.id, payment.clone());
        state.outbox.push(message);
        Ok(payment)
    }

    async fn refund_payment(&self, id: Uuid, _now: DateTime<Utc>) -> Result<Payment, CoreError> {
        let mut state = self.state.lock().await;

        let mut payment = state
            .payments
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("payment", id))?;
        payment.refund()?;
        let mut booking = state
            .bookings
            .get(&payment.booking_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("booking", payment.booking_id))?;
        booking.mark_refunded()?;

        let payment_message = payment.outbox_message("PAYMENT_REFUNDED")?;
        let booking_message = booking.outbox_message("BOOKING_REFUNDED")?;
        state.bookings.insert(booking.id, booking);
        state.payments.insert(payment.id, payment.clone());
        state.outbox.push(payment_message);
        state.outbox.push(booking_message);
        Ok(payment)
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn poll_undelivered(
        &self,
        limit: usize,
        max_retries: i32,
        requeue_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, CoreError> {
        let state = self.state.lock().await;
        let stale_before = now - requeue_after;

        let mut undelivered: Vec<OutboxMessage> = state
            .outbox
            .iter()
            .filter(|m| match m.status {
                OutboxStatus::Created => true,
                OutboxStatus::Failed => m.retry_count < max_retries,
                OutboxStatus::Processing => m.updated_at < stale_before,
                OutboxStatus::Processed => false,
            })
            .cloned()
            .collect();
        undelivered.sort_by_key(|m| m.created_at);
        undelivered.truncate(limit);
        Ok(undelivered)
    }

    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::not_found("outbox message", id))?;
        message.status = OutboxStatus::Processing;
        message.updated_at = now;
        Ok(())
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::not_found("outbox message", id))?;
        message.status = OutboxStatus::Processed;
        message.processed_at = Some(now);
        message.updated_at = now;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<i32, CoreError> {
        let mut state = self.state.lock().await;
        let message = state
            .outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::not_found("outbox message", id))?;
        message.status = OutboxStatus::Failed;
        message.retry_count += 1;
        message.updated_at = Utc::now();
        Ok(message.retry_count)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use tessera_domain::{
    Booking, CreateBookingRequest, Event, OutboxMessage, Payment, TicketType, UpdateEventRequest,
};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        self.page as u64 * self.size as u64
    }
}

/// Terminal moves of the booking state machine that release inventory or
/// freeze it. Executed atomically by the store under row locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingTransition {
    Confirm,
    Cancel,
    Expire,
}

/// Catalog-side event access. Every mutation appends its outbox row in the
/// same transaction.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn create_event(&self, event: Event, ticket_types: Vec<TicketType>) -> Result<Event, CoreError>;

    async fn get_event(&self, id: Uuid) -> Result<Event, CoreError>;

    async fn list_published(&self, page: PageRequest) -> Result<Vec<Event>, CoreError>;

    async fn publish_event(&self, id: Uuid) -> Result<Event, CoreError>;

    /// Admin edit under the event row lock; a published event cannot be
    /// returned to draft. Appends EVENT_UPDATED.
    async fn update_event(&self, id: Uuid, update: &UpdateEventRequest) -> Result<Event, CoreError>;

    /// Remove a draft event and its ticket types. Appends EVENT_DELETED
    /// with the event's final snapshot.
    async fn delete_event(&self, id: Uuid) -> Result<(), CoreError>;

    async fn get_ticket_type(&self, id: Uuid) -> Result<TicketType, CoreError>;

    async fn list_ticket_types(&self, event_id: Uuid) -> Result<Vec<TicketType>, CoreError>;
}

/// Transactional booking access. Each method is one storage transaction;
/// inventory rows are locked exclusively for its duration, and the matching
/// outbox row commits with the mutation or not at all.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Lock the event and every requested ticket type (ascending id order),
    /// reserve all-or-nothing, snapshot prices, persist the PENDING booking
    /// and its BOOKING_CREATED outbox row.
    async fn create_booking(
        &self,
        request: &CreateBookingRequest,
        user_id: &str,
        hold: Duration,
    ) -> Result<Booking, CoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Booking, CoreError>;

    async fn list_bookings(&self, user_id: &str, page: PageRequest) -> Result<Vec<Booking>, CoreError>;

    /// Re-check the status guard under the booking row lock, apply the
    /// transition, release inventory for Cancel/Expire, append the outbox
    /// row. Losing a confirm/expire race surfaces as `InvalidTransition`.
    async fn finalize_booking(
        &self,
        id: Uuid,
        transition: BookingTransition,
        now: DateTime<Utc>,
    ) -> Result<Booking, CoreError>;

    /// Ids of PENDING bookings whose hold deadline has passed. The sweeper
    /// expires each one in its own transaction.
    async fn expired_pending(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Uuid>, CoreError>;
}

/// Payment persistence plus the booking transitions payments drive.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Validate the booking (PENDING, unexpired, no existing payment) under
    /// its row lock and persist the PENDING payment with PAYMENT_INITIATED.
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, CoreError>;

    /// Attach the gateway transaction id produced by the charge call.
    /// Not a status transition; no outbox row.
    async fn record_gateway_transaction(&self, id: Uuid, gateway_tx: &str) -> Result<(), CoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Payment, CoreError>;

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Payment, CoreError>;

    /// Gateway callback result. Success completes the payment and confirms
    /// the booking, appending one outbox row per transition, all in one
    /// transaction; failure marks the payment FAILED.
    async fn complete_payment(
        &self,
        reference: &str,
        gateway_tx: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<Payment, CoreError>;

    /// Mark a PENDING payment FAILED (charge call never reached the
    /// gateway or was rejected synchronously), with PAYMENT_FAILED.
    async fn fail_payment(&self, id: Uuid) -> Result<Payment, CoreError>;

    /// After a successful gateway refund: payment REFUNDED, booking
    /// REFUNDED, one outbox row each, one transaction.
    async fn refund_payment(&self, id: Uuid, now: DateTime<Utc>) -> Result<Payment, CoreError>;
}

/// Relay-side view of the outbox. There is deliberately no `append` here:
/// rows are only ever written inside the transaction that produced the
/// state change, by the store that owns that transaction.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Undelivered rows ordered by `created_at` ascending: CREATED rows,
    /// FAILED rows under the retry ceiling, and PROCESSING rows older than
    /// `requeue_after` (a relay died mid-cycle; re-deliver).
    async fn poll_undelivered(
        &self,
        limit: usize,
        max_retries: i32,
        requeue_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>, CoreError>;

    async fn mark_processing(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), CoreError>;

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), CoreError>;

    /// Increment `retry_count`, set FAILED. Returns the new count so the
    /// relay can decide whether the row just hit the ceiling.
    async fn mark_failed(&self, id: Uuid) -> Result<i32, CoreError>;
}

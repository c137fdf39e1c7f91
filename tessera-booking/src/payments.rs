use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use tessera_core::{BookingStore, CoreError, PaymentGateway, PaymentStore};
use tessera_domain::{Payment, PaymentMethod, PaymentStatus};

/// Drives the payment flow around the gateway. The charge call happens
/// between two store transactions: the PENDING payment commits first, the
/// gateway is called with no locks held, and the outcome is recorded after.
pub struct PaymentManager {
    bookings: Arc<dyn BookingStore>,
    payments: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentManager {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        payments: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self { bookings, payments, gateway }
    }

    /// Start a payment for the caller's PENDING booking and submit the
    /// charge. The booking is confirmed later, by the gateway webhook.
    pub async fn initiate(
        &self,
        user_id: &str,
        booking_id: Uuid,
        method: PaymentMethod,
        details: &HashMap<String, String>,
    ) -> Result<Payment, CoreError> {
        let booking = self.bookings.get_booking(booking_id).await?;
        if !booking.owned_by(user_id) {
            return Err(CoreError::Unauthorized("booking belongs to another user".into()));
        }

        // The amount is the booking's snapshot total; the store re-validates
        // the booking under its row lock before committing.
        let payment = Payment::new(booking.id, booking.total_amount, method);
        let mut payment = self.payments.insert_payment(payment).await?;
        info!(
            payment_id = %payment.id,
            payment_reference = %payment.payment_reference,
            booking_id = %booking.id,
            amount = payment.amount,
            "payment initiated"
        );

        match self
            .gateway
            .charge(&payment.payment_reference, payment.amount, method, details)
            .await
        {
            Ok(gateway_tx) => {
                self.payments.record_gateway_transaction(payment.id, &gateway_tx).await?;
                payment.gateway_transaction_id = Some(gateway_tx);
                Ok(payment)
            }
            Err(err) => {
                warn!(payment_id = %payment.id, %err, "gateway charge failed");
                if let Err(fail_err) = self.payments.fail_payment(payment.id).await {
                    error!(payment_id = %payment.id, %fail_err, "could not mark payment failed");
                }
                Err(err)
            }
        }
    }

    /// Gateway callback. Success completes the payment and confirms the
    /// booking atomically; failure marks the payment FAILED and leaves the
    /// booking PENDING for another attempt.
    pub async fn complete(&self, reference: &str, gateway_tx: &str, success: bool) -> Result<Payment, CoreError> {
        let payment = self
            .payments
            .complete_payment(reference, gateway_tx, success, Utc::now())
            .await?;
        info!(
            payment_reference = %reference,
            status = payment.status.as_str(),
            "payment completion processed"
        );
        Ok(payment)
    }

    /// Refund a COMPLETED payment. The gateway refund runs first; only a
    /// successful one moves payment and booking to REFUNDED.
    pub async fn refund(&self, user_id: &str, payment_id: Uuid) -> Result<Payment, CoreError> {
        let payment = self.payments.get_payment(payment_id).await?;
        let booking = self.bookings.get_booking(payment.booking_id).await?;
        if !booking.owned_by(user_id) {
            return Err(CoreError::Unauthorized("payment belongs to another user".into()));
        }
        if payment.status != PaymentStatus::Completed {
            return Err(CoreError::InvalidTransition {
                from: payment.status.to_string(),
                to: PaymentStatus::Refunded.to_string(),
            });
        }
        let gateway_tx = payment
            .gateway_transaction_id
            .as_deref()
            .ok_or_else(|| CoreError::GatewayFailure("no gateway transaction recorded".into()))?;

        self.gateway.refund(gateway_tx, payment.amount).await?;

        let payment = self.payments.refund_payment(payment_id, Utc::now()).await?;
        info!(payment_id = %payment.id, "payment refunded");
        Ok(payment)
    }

    /// Look up a payment by its reference, scoped to the booking owner.
    pub async fn get_by_reference(&self, user_id: &str, reference: &str) -> Result<Payment, CoreError> {
        let payment = self.payments.get_payment_by_reference(reference).await?;
        let booking = self.bookings.get_booking(payment.booking_id).await?;
        if !booking.owned_by(user_id) {
            return Err(CoreError::Unauthorized("payment belongs to another user".into()));
        }
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tessera_core::EventStore;
    use tessera_domain::{BookingStatus, CreateBookingRequest, Event, ItemRequest, TicketType};
    use tessera_store::{MemoryStore, SimulatedGateway};

    async fn seed_booking(store: &MemoryStore) -> tessera_domain::Booking {
        let event = Event::new(
            "Rust Conf".to_string(),
            None,
            Utc::now() + Duration::days(30),
            Utc::now() + Duration::days(31),
            10,
            5_000,
        )
        .unwrap();
        let tt = TicketType::new(event.id, "GA".to_string(), None, 2_500, 10).unwrap();
        store.create_event(event.clone(), vec![tt.clone()]).await.unwrap();
        store.publish_event(event.id).await.unwrap();

        store
            .create_booking(
                &CreateBookingRequest {
                    event_id: event.id,
                    items: vec![ItemRequest { ticket_type_id: tt.id, quantity: 2 }],
                },
                "user-1",
                Duration::minutes(15),
            )
            .await
            .unwrap()
    }

    fn manager(store: &MemoryStore) -> PaymentManager {
        PaymentManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(SimulatedGateway),
        )
    }

    #[tokio::test]
    async fn initiate_then_webhook_confirms_booking() {
        let store = MemoryStore::new();
        let booking = seed_booking(&store).await;
        let manager = manager(&store);

        let payment = manager
            .initiate("user-1", booking.id, PaymentMethod::CreditCard, &HashMap::new())
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount, booking.total_amount);
        assert!(payment.gateway_transaction_id.is_some());

        let payment = manager
            .complete(&payment.payment_reference, "gw_webhook", true)
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);

        let booking = store.get_booking(booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);

        // One outbox row per transition, in order.
        let types: Vec<String> = store
            .outbox_snapshot()
            .await
            .into_iter()
            .map(|m| m.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                "EVENT_CREATED",
                "EVENT_PUBLISHED",
                "BOOKING_CREATED",
                "PAYMENT_INITIATED",
                "PAYMENT_COMPLETED",
                "BOOKING_CONFIRMED",
            ]
        );
    }

    #[tokio::test]
    async fn declined_charge_marks_payment_failed() {
        let store = MemoryStore::new();
        let booking = seed_booking(&store).await;
        let manager = manager(&store);

        let mut details = HashMap::new();
        details.insert("simulate".to_string(), "decline".to_string());

        let err = manager
            .initiate("user-1", booking.id, PaymentMethod::CreditCard, &details)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::GatewayFailure(_)));

        let booking = store.get_booking(booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);

        let types: Vec<String> = store
            .outbox_snapshot()
            .await
            .into_iter()
            .map(|m| m.event_type)
            .collect();
        assert!(types.contains(&"PAYMENT_FAILED".to_string()));
    }

    #[tokio::test]
    async fn failed_webhook_leaves_booking_pending_for_retry() {
        let store = MemoryStore::new();
        let booking = seed_booking(&store).await;
        let manager = manager(&store);

        let payment = manager
            .initiate("user-1", booking.id, PaymentMethod::Paypal, &HashMap::new())
            .await
            .unwrap();
        let payment = manager
            .complete(&payment.payment_reference, "gw_webhook", false)
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);

        let booking = store.get_booking(booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn refund_moves_payment_and_booking_to_refunded() {
        let store = MemoryStore::new();
        let booking = seed_booking(&store).await;
        let manager = manager(&store);

        let payment = manager
            .initiate("user-1", booking.id, PaymentMethod::CreditCard, &HashMap::new())
            .await
            .unwrap();
        manager
            .complete(&payment.payment_reference, "gw_webhook", true)
            .await
            .unwrap();

        let payment = manager.refund("user-1", payment.id).await.unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);

        let booking = store.get_booking(booking.id).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Refunded);
    }

    #[tokio::test]
    async fn refund_of_pending_payment_is_rejected() {
        let store = MemoryStore::new();
        let booking = seed_booking(&store).await;
        let manager = manager(&store);

        let payment = manager
            .initiate("user-1", booking.id, PaymentMethod::CreditCard, &HashMap::new())
            .await
            .unwrap();

        let err = manager.refund("user-1", payment.id).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn second_payment_for_a_booking_is_rejected() {
        let store = MemoryStore::new();
        let booking = seed_booking(&store).await;
        let manager = manager(&store);

        manager
            .initiate("user-1", booking.id, PaymentMethod::CreditCard, &HashMap::new())
            .await
            .unwrap();
        let err = manager
            .initiate("user-1", booking.id, PaymentMethod::CreditCard, &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePayment(id) if id == booking.id));
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use tessera_core::{CoreError, PaymentStore};
use tessera_domain::{BookingStatus, DomainError, Payment, PaymentMethod, PaymentStatus};

use crate::booking_repo::{load_booking_for_update, update_booking_status};
use crate::database::db_err;
use crate::outbox_repo;

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    payment_reference: String,
    booking_id: Uuid,
    amount: i64,
    status: String,
    method: String,
    gateway_transaction_id: Option<String>,
    payment_date: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment, CoreError> {
        let status = PaymentStatus::parse(&self.status)
            .ok_or_else(|| CoreError::Storage(format!("unknown payment status: {}", self.status)))?;
        let method = PaymentMethod::parse(&self.method)
            .ok_or_else(|| CoreError::Storage(format!("unknown payment method: {}", self.method)))?;
        Ok(Payment {
            id: self.id,
            payment_reference: self.payment_reference,
            booking_id: self.booking_id,
            amount: self.amount,
            status,
            method,
            gateway_transaction_id: self.gateway_transaction_id,
            payment_date: self.payment_date,
            created_at: self.created_at,
        })
    }
}

const SELECT_PAYMENT: &str = "SELECT id, payment_reference, booking_id, amount, status, method, gateway_transaction_id, payment_date, created_at FROM payments";

async fn lock_payment_by_reference(tx: &mut Transaction<'_, Postgres>, reference: &str) -> Result<Payment, CoreError> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!(
        "{SELECT_PAYMENT} WHERE payment_reference = $1 FOR UPDATE"
    ))
    .bind(reference)
    .fetch_optional(&mut **tx)
    .await
    .map_err(db_err)?
    .ok_or_else(|| CoreError::not_found("payment", reference))?;
    row.into_payment()
}

async fn lock_payment_by_id(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Payment, CoreError> {
    let row = sqlx::query_as::<_, PaymentRow>(&format!("{SELECT_PAYMENT} WHERE id = $1 FOR UPDATE"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| CoreError::not_found("payment", id))?;
    row.into_payment()
}

async fn write_payment(tx: &mut Transaction<'_, Postgres>, payment: &Payment) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE payments SET status = $1, gateway_transaction_id = $2, payment_date = $3 WHERE id = $4",
    )
    .bind(payment.status.as_str())
    .bind(&payment.gateway_transaction_id)
    .bind(payment.payment_date)
    .bind(payment.id)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn insert_payment(&self, payment: Payment) -> Result<Payment, CoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lock the booking so a racing confirm/expire cannot slip between
        // the guard checks and the insert.
        let booking = load_booking_for_update(&mut tx, payment.booking_id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(CoreError::InvalidTransition {
                from: booking.status.to_string(),
                to: BookingStatus::Confirmed.to_string(),
            });
        }
        if booking.expires_at < now {
            return Err(DomainError::BookingExpired.into());
        }

        let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM payments WHERE booking_id = $1")
            .bind(payment.booking_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if existing.is_some() {
            return Err(CoreError::DuplicatePayment(payment.booking_id));
        }

        sqlx::query(
            r#"
            INSERT INTO payments (id, payment_reference, booking_id, amount, status, method, gateway_transaction_id, payment_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(payment.id)
        .bind(&payment.payment_reference)
        .bind(payment.booking_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(payment.method.as_str())
        .bind(&payment.gateway_transaction_id)
        .bind(payment.payment_date)
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        outbox_repo::append(&mut tx, &payment.outbox_message("PAYMENT_INITIATED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(payment)
    }

    async fn record_gateway_transaction(&self, id: Uuid, gateway_tx: &str) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE payments SET gateway_transaction_id = $1 WHERE id = $2")
            .bind(gateway_tx)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("payment", id));
        }
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Payment, CoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!("{SELECT_PAYMENT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("payment", id))?;
        row.into_payment()
    }

    async fn get_payment_by_reference(&self, reference: &str) -> Result<Payment, CoreError> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!("{SELECT_PAYMENT} WHERE payment_reference = $1"))
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or_else(|| CoreError::not_found("payment", reference))?;
        row.into_payment()
    }

    async fn complete_payment(
        &self,
        reference: &str,
        gateway_tx: &str,
        success: bool,
        now: DateTime<Utc>,
    ) -> Result<Payment, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut payment = lock_payment_by_reference(&mut tx, reference).await?;

        if success {
            payment.complete(gateway_tx.to_string(), now)?;
            // Confirming the booking is part of the same transaction; if the
            // hold already lapsed the whole completion rolls back.
            let mut booking = load_booking_for_update(&mut tx, payment.booking_id).await?;
            booking.confirm(now)?;

            write_payment(&mut tx, &payment).await?;
            update_booking_status(&mut tx, &booking).await?;
            outbox_repo::append(&mut tx, &payment.outbox_message("PAYMENT_COMPLETED")?).await?;
            outbox_repo::append(&mut tx, &booking.outbox_message("BOOKING_CONFIRMED")?).await?;
        } else {
            payment.fail(Some(gateway_tx.to_string()))?;
            write_payment(&mut tx, &payment).await?;
            outbox_repo::append(&mut tx, &payment.outbox_message("PAYMENT_FAILED")?).await?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(payment)
    }

    async fn fail_payment(&self, id: Uuid) -> Result<Payment, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut payment = lock_payment_by_id(&mut tx, id).await?;
        payment.fail(None)?;

        write_payment(&mut tx, &payment).await?;
        outbox_repo::append(&mut tx, &payment.outbox_message("PAYMENT_FAILED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(payment)
    }

    async fn refund_payment(&self, id: Uuid, _now: DateTime<Utc>) -> Result<Payment, CoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut payment = lock_payment_by_id(&mut tx, id).await?;
        payment.refund()?;
        let mut booking = load_booking_for_update(&mut tx, payment.booking_id).await?;
        booking.mark_refunded()?;

        write_payment(&mut tx, &payment).await?;
        update_booking_status(&mut tx, &booking).await?;
        outbox_repo::append(&mut tx, &payment.outbox_message("PAYMENT_REFUNDED")?).await?;
        outbox_repo::append(&mut tx, &booking.outbox_message("BOOKING_REFUNDED")?).await?;
        tx.commit().await.map_err(db_err)?;

        Ok(payment)
    }
}

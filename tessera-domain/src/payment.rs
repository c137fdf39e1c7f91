use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::outbox::{AggregateType, OutboxMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "COMPLETED" => Some(PaymentStatus::Completed),
            "FAILED" => Some(PaymentStatus::Failed),
            "REFUNDED" => Some(PaymentStatus::Refunded),
            "PARTIALLY_REFUNDED" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Paypal,
    BankTransfer,
    Crypto,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "CREDIT_CARD",
            PaymentMethod::DebitCard => "DEBIT_CARD",
            PaymentMethod::Paypal => "PAYPAL",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::Crypto => "CRYPTO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREDIT_CARD" => Some(PaymentMethod::CreditCard),
            "DEBIT_CARD" => Some(PaymentMethod::DebitCard),
            "PAYPAL" => Some(PaymentMethod::Paypal),
            "BANK_TRANSFER" => Some(PaymentMethod::BankTransfer),
            "CRYPTO" => Some(PaymentMethod::Crypto),
            _ => None,
        }
    }
}

/// One-to-one payment for a booking. The gateway call happens outside any
/// inventory lock; only the resulting status transition is transactional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub payment_reference: String,
    pub booking_id: Uuid,
    pub amount: i64,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub gateway_transaction_id: Option<String>,
    pub payment_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(booking_id: Uuid, amount: i64, method: PaymentMethod) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payment_reference: generate_payment_reference(now),
            booking_id,
            amount,
            status: PaymentStatus::Pending,
            method,
            gateway_transaction_id: None,
            payment_date: None,
            created_at: now,
        }
    }

    pub fn complete(&mut self, gateway_transaction_id: String, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid_transition(PaymentStatus::Completed));
        }
        self.status = PaymentStatus::Completed;
        self.gateway_transaction_id = Some(gateway_transaction_id);
        self.payment_date = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, gateway_transaction_id: Option<String>) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(self.invalid_transition(PaymentStatus::Failed));
        }
        self.status = PaymentStatus::Failed;
        if gateway_transaction_id.is_some() {
            self.gateway_transaction_id = gateway_transaction_id;
        }
        Ok(())
    }

    pub fn refund(&mut self) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Completed {
            return Err(self.invalid_transition(PaymentStatus::Refunded));
        }
        self.status = PaymentStatus::Refunded;
        Ok(())
    }

    pub fn outbox_message(&self, event_type: &str) -> Result<OutboxMessage, serde_json::Error> {
        OutboxMessage::snapshot(AggregateType::Payment, self.id.to_string(), event_type, self)
    }

    fn invalid_transition(&self, to: PaymentStatus) -> DomainError {
        DomainError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

fn generate_payment_reference(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("PAY-{}-{}", now.timestamp_millis(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_records_gateway_transaction_and_date() {
        let mut payment = Payment::new(Uuid::new_v4(), 5_000, PaymentMethod::CreditCard);

        payment.complete("gw_123".to_string(), Utc::now()).unwrap();
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.gateway_transaction_id.as_deref(), Some("gw_123"));
        assert!(payment.payment_date.is_some());
    }

    #[test]
    fn complete_twice_is_rejected() {
        let mut payment = Payment::new(Uuid::new_v4(), 5_000, PaymentMethod::CreditCard);
        payment.complete("gw_123".to_string(), Utc::now()).unwrap();

        assert!(payment.complete("gw_456".to_string(), Utc::now()).is_err());
    }

    #[test]
    fn refund_requires_completed() {
        let mut payment = Payment::new(Uuid::new_v4(), 5_000, PaymentMethod::Paypal);
        assert!(payment.refund().is_err());

        payment.complete("gw_1".to_string(), Utc::now()).unwrap();
        payment.refund().unwrap();
        assert_eq!(payment.status, PaymentStatus::Refunded);
    }

    #[test]
    fn payment_reference_has_expected_shape() {
        let payment = Payment::new(Uuid::new_v4(), 100, PaymentMethod::Crypto);
        assert!(payment.payment_reference.starts_with("PAY-"));
    }
}

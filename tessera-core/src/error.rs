use tessera_domain::DomainError;

/// Failure taxonomy shared across the reservation manager, payment flow,
/// stores and relay. Business-rule variants surface to the caller as-is;
/// `Storage` is the only transient kind and the only one the relay retries.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory { requested: i32, available: i32 },

    #[error("event is not bookable: {0}")]
    EventNotBookable(String),

    #[error("payment already exists for booking {0}")]
    DuplicatePayment(uuid::Uuid),

    #[error("payment gateway failure: {0}")]
    GatewayFailure(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl CoreError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

impl From<DomainError> for CoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidTransition { from, to } => CoreError::InvalidTransition { from, to },
            // Acting on a booking past its hold deadline is a transition the
            // guard refuses, surfaced the same way as any other guard miss.
            DomainError::BookingExpired => CoreError::InvalidTransition {
                from: "PENDING".into(),
                to: "CONFIRMED".into(),
            },
            DomainError::InsufficientInventory { requested, available } => {
                CoreError::InsufficientInventory { requested, available }
            }
            DomainError::ReleaseOverflow { requested, capacity } => CoreError::Storage(format!(
                "inventory release of {requested} exceeds capacity {capacity}"
            )),
            DomainError::NotBookable(reason) => CoreError::EventNotBookable(reason),
            DomainError::InvalidQuantity(qty) => CoreError::InsufficientInventory {
                requested: qty,
                available: 0,
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Storage(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_guard_errors_map_to_business_variants() {
        let err: CoreError = DomainError::InvalidTransition {
            from: "CANCELLED".into(),
            to: "CONFIRMED".into(),
        }
        .into();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));

        let err: CoreError = DomainError::InsufficientInventory {
            requested: 5,
            available: 2,
        }
        .into();
        assert!(matches!(
            err,
            CoreError::InsufficientInventory { requested: 5, available: 2 }
        ));

        let err: CoreError = DomainError::NotBookable("sold out".into()).into();
        assert!(matches!(err, CoreError::EventNotBookable(_)));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("booking has expired")]
    BookingExpired,

    #[error("insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory { requested: i32, available: i32 },

    #[error("release of {requested} would exceed total capacity {capacity}")]
    ReleaseOverflow { requested: i32, capacity: i32 },

    #[error("event is not bookable: {0}")]
    NotBookable(String),

    #[error("quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),
}

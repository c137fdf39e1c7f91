pub mod bus;
pub mod error;
pub mod gateway;
pub mod repository;

pub use bus::EventPublisher;
pub use error::CoreError;
pub use gateway::PaymentGateway;
pub use repository::{
    BookingStore, BookingTransition, EventStore, OutboxStore, PageRequest, PaymentStore,
};

pub mod booking;
pub mod error;
pub mod event;
pub mod outbox;
pub mod payment;

pub use booking::{Booking, BookingItem, BookingStatus, CreateBookingRequest, ItemRequest};
pub use error::DomainError;
pub use event::{Event, TicketType, UpdateEventRequest};
pub use outbox::{AggregateType, OutboxMessage, OutboxStatus};
pub use payment::{Payment, PaymentMethod, PaymentStatus};

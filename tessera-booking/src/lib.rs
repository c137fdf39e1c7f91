pub mod manager;
pub mod payments;
pub mod sweeper;

pub use manager::ReservationManager;
pub use payments::PaymentManager;
pub use sweeper::ExpirySweeper;

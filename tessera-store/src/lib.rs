pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod event_repo;
pub mod events;
pub mod gateway;
pub mod memory;
pub mod outbox_repo;
pub mod payment_repo;

pub use app_config::Config;
pub use booking_repo::PgBookingStore;
pub use database::DbClient;
pub use event_repo::PgEventStore;
pub use events::EventProducer;
pub use gateway::SimulatedGateway;
pub use memory::MemoryStore;
pub use outbox_repo::PgOutboxStore;
pub use payment_repo::PgPaymentStore;

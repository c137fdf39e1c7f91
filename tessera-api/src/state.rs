use std::sync::Arc;

use tessera_booking::{PaymentManager, ReservationManager};
use tessera_core::EventStore;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub events: Arc<dyn EventStore>,
    pub reservations: Arc<ReservationManager>,
    pub payments: Arc<PaymentManager>,
    pub auth: AuthConfig,
}

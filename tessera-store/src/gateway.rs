use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use tessera_core::{CoreError, PaymentGateway};
use tessera_domain::PaymentMethod;

/// Stand-in provider for environments without a real gateway. Charges
/// succeed unless the caller passes `simulate=decline` in the details map.
#[derive(Clone, Default)]
pub struct SimulatedGateway;

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn charge(
        &self,
        reference: &str,
        amount: i64,
        _method: PaymentMethod,
        details: &HashMap<String, String>,
    ) -> Result<String, CoreError> {
        if details.get("simulate").map(String::as_str) == Some("decline") {
            return Err(CoreError::GatewayFailure("card declined".into()));
        }
        let transaction_id = format!("sim_{}", Uuid::new_v4().simple());
        info!("Simulated charge of {} for {}: {}", amount, reference, transaction_id);
        Ok(transaction_id)
    }

    async fn refund(&self, transaction_id: &str, amount: i64) -> Result<(), CoreError> {
        info!("Simulated refund of {} for {}", amount, transaction_id);
        Ok(())
    }

    async fn status(&self, _transaction_id: &str) -> Result<String, CoreError> {
        Ok("COMPLETED".to_string())
    }
}

use std::collections::HashMap;

use async_trait::async_trait;

use tessera_domain::PaymentMethod;

use crate::error::CoreError;

/// Swappable payment provider. Calls may be slow and block on the provider;
/// they must never run while an inventory row lock is held.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the customer. Returns the provider's transaction id.
    async fn charge(
        &self,
        reference: &str,
        amount: i64,
        method: PaymentMethod,
        details: &HashMap<String, String>,
    ) -> Result<String, CoreError>;

    /// Refund a previously captured charge. A failure here is surfaced to
    /// the caller; the core does not retry refunds on its own.
    async fn refund(&self, transaction_id: &str, amount: i64) -> Result<(), CoreError>;

    async fn status(&self, transaction_id: &str) -> Result<String, CoreError>;
}

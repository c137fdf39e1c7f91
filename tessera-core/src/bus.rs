use async_trait::async_trait;

use crate::error::CoreError;

/// Seam to the message bus. The relay is the only caller; publishing with
/// the aggregate id as key preserves per-aggregate ordering on partitioned
/// buses.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), CoreError>;
}

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tessera_core::{CoreError, EventPublisher, OutboxStore};
use tessera_domain::OutboxMessage;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub max_retries: i32,
    /// PROCESSING rows whose last touch is older than this are treated as
    /// abandoned by a dead relay and re-delivered.
    pub requeue_after: chrono::Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_retries: 5,
            requeue_after: chrono::Duration::seconds(60),
        }
    }
}

/// Polls the outbox and pushes undelivered rows to the bus. Delivery is
/// at-least-once: a crash between publish and mark_processed re-delivers
/// the row on a later cycle, never drops it.
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>, config: RelayConfig) -> Self {
        Self { outbox, publisher, config }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        warn!(%err, "outbox cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("outbox relay shutting down");
                    return;
                }
            }
        }
    }

    /// One poll-and-publish pass. Rows are handled oldest first so
    /// per-aggregate order on the bus follows commit order.
    pub async fn run_cycle(&self) -> Result<usize, CoreError> {
        let now = Utc::now();
        let batch = self
            .outbox
            .poll_undelivered(self.config.batch_size, self.config.max_retries, self.config.requeue_after, now)
            .await?;

        let mut delivered = 0;
        for message in batch {
            self.outbox.mark_processing(message.id, Utc::now()).await?;

            let topic = topic_for(&message.aggregate_type);
            let payload = message.payload.to_string();
            match self.publisher.publish(topic, &message.aggregate_id, &payload).await {
                Ok(()) => {
                    self.outbox.mark_processed(message.id, Utc::now()).await?;
                    debug!(message_id = %message.id, topic, event_type = %message.event_type, "outbox message delivered");
                    delivered += 1;
                }
                Err(err) => {
                    let retry_count = self.outbox.mark_failed(message.id).await?;
                    if retry_count >= self.config.max_retries {
                        self.alert_exhausted(&message, retry_count);
                    } else {
                        warn!(
                            message_id = %message.id,
                            retry_count,
                            %err,
                            "outbox publish failed, will retry"
                        );
                    }
                }
            }
        }
        Ok(delivered)
    }

    /// The row has exhausted its retries; it will not be polled
    /// again and needs an operator to look at it.
    fn alert_exhausted(&self, message: &OutboxMessage, retry_count: i32) {
        error!(
            message_id = %message.id,
            aggregate_type = %message.aggregate_type,
            aggregate_id = %message.aggregate_id,
            event_type = %message.event_type,
            retry_count,
            "outbox message exhausted its retries, manual intervention required"
        );
    }
}

/// Topic routing by aggregate type. Unknown types, written by a newer
/// deployment, land on the notifications topic instead of being dropped.
fn topic_for(aggregate_type: &str) -> &'static str {
    match aggregate_type {
        "EVENT" => "events",
        "BOOKING" => "bookings",
        "PAYMENT" => "payments",
        _ => "notifications",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tessera_core::EventStore;
    use tessera_domain::{Event, OutboxStatus, TicketType};
    use tessera_store::MemoryStore;

    /// Publisher test double: records deliveries, fails on demand.
    #[derive(Default)]
    struct RecordingBus {
        delivered: Mutex<Vec<(String, String)>>,
        fail: Mutex<bool>,
    }

    impl RecordingBus {
        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn deliveries(&self) -> Vec<(String, String)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingBus {
        async fn publish(&self, topic: &str, key: &str, _payload: &str) -> Result<(), CoreError> {
            if *self.fail.lock().unwrap() {
                return Err(CoreError::Storage("broker unavailable".into()));
            }
            self.delivered.lock().unwrap().push((topic.to_string(), key.to_string()));
            Ok(())
        }
    }

    async fn seed_two_events(store: &MemoryStore) {
        for name in ["Rust Conf", "Tokio Days"] {
            let event = Event::new(
                name.to_string(),
                None,
                Utc::now() + ChronoDuration::days(30),
                Utc::now() + ChronoDuration::days(31),
                10,
                5_000,
            )
            .unwrap();
            let tt = TicketType::new(event.id, "GA".to_string(), None, 2_500, 10).unwrap();
            store.create_event(event.clone(), vec![tt]).await.unwrap();
            store.publish_event(event.id).await.unwrap();
        }
    }

    fn relay(store: &MemoryStore, bus: &Arc<RecordingBus>, config: RelayConfig) -> OutboxRelay {
        OutboxRelay::new(Arc::new(store.clone()), Arc::clone(bus) as Arc<dyn EventPublisher>, config)
    }

    #[tokio::test]
    async fn delivers_in_creation_order_and_marks_processed() {
        let store = MemoryStore::new();
        seed_two_events(&store).await;
        let bus = Arc::new(RecordingBus::default());
        let relay = relay(&store, &bus, RelayConfig::default());

        let delivered = relay.run_cycle().await.unwrap();
        assert_eq!(delivered, 4);
        assert!(bus.deliveries().iter().all(|(topic, _)| topic == "events"));

        let outbox = store.outbox_snapshot().await;
        assert!(outbox.iter().all(|m| m.status == OutboxStatus::Processed));
        assert!(outbox.iter().all(|m| m.processed_at.is_some()));

        // Keys follow the aggregate ids in commit order.
        let keys: Vec<String> = bus.deliveries().into_iter().map(|(_, k)| k).collect();
        let expected: Vec<String> = outbox.iter().map(|m| m.aggregate_id.clone()).collect();
        assert_eq!(keys, expected);

        // Nothing left to deliver.
        assert_eq!(relay.run_cycle().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_publish_increments_retry_and_redelivers_later() {
        let store = MemoryStore::new();
        seed_two_events(&store).await;
        let bus = Arc::new(RecordingBus::default());
        let relay = relay(&store, &bus, RelayConfig::default());

        bus.set_failing(true);
        assert_eq!(relay.run_cycle().await.unwrap(), 0);

        let outbox = store.outbox_snapshot().await;
        assert!(outbox.iter().all(|m| m.status == OutboxStatus::Failed));
        assert!(outbox.iter().all(|m| m.retry_count == 1));

        // Broker recovers; the same rows go out on the next cycle.
        bus.set_failing(false);
        assert_eq!(relay.run_cycle().await.unwrap(), 4);
        assert_eq!(bus.deliveries().len(), 4);
    }

    #[tokio::test]
    async fn rows_beyond_the_retry_ceiling_are_left_alone() {
        let store = MemoryStore::new();
        seed_two_events(&store).await;
        let bus = Arc::new(RecordingBus::default());
        let config = RelayConfig { max_retries: 2, ..RelayConfig::default() };
        let relay = relay(&store, &bus, config);

        bus.set_failing(true);
        relay.run_cycle().await.unwrap();
        relay.run_cycle().await.unwrap();

        // Every row has now failed twice; with the ceiling at 2 the poll
        // returns nothing even though the broker is healthy again.
        bus.set_failing(false);
        assert_eq!(relay.run_cycle().await.unwrap(), 0);
        assert!(bus.deliveries().is_empty());

        let outbox = store.outbox_snapshot().await;
        assert!(outbox.iter().all(|m| m.retry_count == 2));
    }

    #[tokio::test]
    async fn abandoned_processing_rows_are_redelivered() {
        let store = MemoryStore::new();
        seed_two_events(&store).await;
        let bus = Arc::new(RecordingBus::default());

        // Simulate a relay that claimed every row and died before publishing.
        let all = store
            .poll_undelivered(10, 5, ChronoDuration::seconds(60), Utc::now())
            .await
            .unwrap();
        for message in &all {
            store.mark_processing(message.id, Utc::now()).await.unwrap();
        }

        // A fresh claim is invisible to a relay with a normal liveness
        // window, but a zero window treats it as already abandoned.
        let relay_normal = relay(&store, &bus, RelayConfig::default());
        assert_eq!(relay_normal.run_cycle().await.unwrap(), 0);

        let config = RelayConfig { requeue_after: ChronoDuration::zero(), ..RelayConfig::default() };
        let relay_zero = relay(&store, &bus, config);
        assert_eq!(relay_zero.run_cycle().await.unwrap(), 4);
        assert_eq!(bus.deliveries().len(), 4);
    }

    #[test]
    fn unknown_aggregate_types_route_to_notifications() {
        assert_eq!(topic_for("EVENT"), "events");
        assert_eq!(topic_for("BOOKING"), "bookings");
        assert_eq!(topic_for("PAYMENT"), "payments");
        assert_eq!(topic_for("LOYALTY"), "notifications");
    }
}

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tessera_api::{
    app,
    state::{AppState, AuthConfig},
};
use tessera_booking::{ExpirySweeper, PaymentManager, ReservationManager};
use tessera_outbox::{OutboxRelay, RelayConfig};
use tessera_store::{DbClient, EventProducer, PgBookingStore, PgEventStore, PgOutboxStore, PgPaymentStore, SimulatedGateway};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = tessera_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Tessera API on port {}", config.server.port);

    // Postgres Connection
    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    // Kafka Connection
    let kafka_producer = EventProducer::new(&config.kafka.brokers).expect("Failed to create Kafka producer");

    let event_store = Arc::new(PgEventStore::new(db.pool.clone()));
    let booking_store = Arc::new(PgBookingStore::new(db.pool.clone()));
    let payment_store = Arc::new(PgPaymentStore::new(db.pool.clone()));
    let outbox_store = Arc::new(PgOutboxStore::new(db.pool.clone()));

    let reservations = Arc::new(ReservationManager::new(
        booking_store.clone(),
        chrono::Duration::seconds(config.booking.hold_seconds),
    ));
    let payments = Arc::new(PaymentManager::new(
        booking_store.clone(),
        payment_store.clone(),
        Arc::new(SimulatedGateway),
    ));

    // Background workers share one shutdown signal with the server.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let relay = OutboxRelay::new(
        outbox_store.clone(),
        Arc::new(kafka_producer),
        RelayConfig {
            poll_interval: Duration::from_secs(config.outbox.poll_interval_seconds),
            batch_size: config.outbox.batch_size,
            max_retries: config.outbox.max_retries,
            requeue_after: chrono::Duration::seconds(config.outbox.requeue_after_seconds),
        },
    );
    tokio::spawn(relay.run(shutdown_rx.clone()));

    let sweeper = ExpirySweeper::new(
        booking_store.clone(),
        Duration::from_secs(config.booking.sweep_interval_seconds),
        config.booking.sweep_batch_size,
    );
    tokio::spawn(sweeper.run(shutdown_rx));

    let app_state = AppState {
        events: event_store,
        reservations,
        payments,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .unwrap();

    let _ = shutdown_tx.send(true);
}

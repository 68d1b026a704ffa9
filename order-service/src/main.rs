use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use order_service::api::{self, AppState};
use order_service::clients::{
    HttpInventoryLedger, HttpPaymentGateway, HttpProductCatalog, HttpUserDirectory,
};
use order_service::config::Args;
use order_service::outbox::{OutboxProcessor, OutboxPublisher};
use order_service::payments::PaymentResultConsumer;
use order_service::sweeper::OrderSweeper;
use order_service::{CheckoutOrchestrator, PgOrderStore};
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use tracing::info;
use tracing_subscriber::EnvFilter;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    // Run migrations first
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = bb8::Pool::builder().build(config).await?;

    let mut producer_config = ClientConfig::new();
    producer_config
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("message.timeout.ms", "5000");
    for (key, value) in args.messaging.producer_settings() {
        producer_config.set(key, value);
    }
    let producer: FutureProducer = producer_config.create()?;

    let http_client = reqwest::Client::builder()
        .timeout(args.checkout_config().call_timeout)
        .build()?;

    let orchestrator = Arc::new(CheckoutOrchestrator::new(
        Arc::new(PgOrderStore::new(pool.clone())),
        Arc::new(HttpInventoryLedger::new(http_client.clone(), &args.inventory_url)),
        Arc::new(HttpProductCatalog::new(http_client.clone(), &args.catalog_url)),
        Arc::new(HttpUserDirectory::new(http_client.clone(), &args.user_directory_url)),
        Arc::new(HttpPaymentGateway::new(http_client, &args.payment_url)),
        Arc::new(OutboxPublisher::new(pool.clone())),
        args.checkout_config(),
    ));

    let outbox_processor = OutboxProcessor::new(
        pool.clone(),
        producer,
        args.messaging.clone(),
        args.outbox_interval(),
    );
    tokio::spawn(async move {
        outbox_processor.run().await;
    });

    let consumer = PaymentResultConsumer::consumer(&args.kafka_brokers, &args.messaging)?;
    let payment_results = PaymentResultConsumer::new(orchestrator.clone());
    tokio::spawn(async move {
        payment_results.run(consumer).await;
    });

    let sweeper = OrderSweeper::new(orchestrator.clone(), args.sweep_interval());
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let app = api::create_router(AppState { orchestrator });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Order service listening on port {}", args.port);
    axum::serve(listener, app).await?;

    Ok(())
}

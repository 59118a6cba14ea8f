//! Moeda API Server
//!
//! Main entry point for the coin ledger service.

use std::sync::Arc;

use anyhow::Context;
use sea_orm_migration::MigratorTrait;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use moeda_api::{AppState, create_router};
use moeda_core::LedgerServices;
use moeda_core::clock::SystemClock;
use moeda_core::notify::BroadcastNotifier;
use moeda_db::{PgLedgerStore, connect_with, migration::Migrator};
use moeda_shared::AppConfig;

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "moeda=debug,moeda_core=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if log_format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Logs every notification until the channel closes.
///
/// Delivery to students and staff happens elsewhere; this keeps a trace of
/// what was published.
async fn log_notifications(notifier: BroadcastNotifier) {
    let mut rx = notifier.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => info!(
                event_id = %event.id,
                kind = ?event.kind,
                recipients = event.recipients.len(),
                "Notification published"
            ),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("failed to load configuration")?;
    init_tracing(&config.server.log_format);

    let services = if let Some(database) = &config.database {
        let db = connect_with(database)
            .await
            .context("failed to connect to database")?;
        Migrator::up(&db, None)
            .await
            .context("failed to run migrations")?;
        info!("Connected to database");
        LedgerServices::new(
            Arc::new(PgLedgerStore::new(db)),
            Arc::new(SystemClock),
            &config.ledger,
            &config.policies,
        )?
    } else {
        warn!("No database configured, using the in-memory ledger");
        LedgerServices::in_memory(&config.ledger, &config.policies)?
    };
    let services = Arc::new(services);

    tokio::spawn(
        Arc::clone(&services.expiration).run_periodic(services.sweep_interval),
    );
    tokio::spawn(Arc::clone(&services.outbox).run_periodic(services.outbox_interval));
    tokio::spawn(log_notifications(services.notifier.clone()));

    let app = create_router(AppState::new(services));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

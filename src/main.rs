use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use staybook::config::AppConfig;
use staybook::db;
use staybook::handlers;
use staybook::services::capability::SqliteCapabilities;
use staybook::services::clock::SystemClock;
use staybook::services::events::webhook::WebhookSink;
use staybook::services::events::{EventSink, NoopSink};
use staybook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if config.api_token == "changeme" {
        tracing::warn!("API_TOKEN is still the default, set it before exposing the service");
    }

    let db = Arc::new(Mutex::new(db::init_db(&config.database_url)?));

    let event_sink: Box<dyn EventSink> = if config.event_webhook_url.is_empty() {
        tracing::info!("no event webhook configured, events stay local");
        Box::new(NoopSink)
    } else {
        tracing::info!("delivering events to {}", config.event_webhook_url);
        Box::new(WebhookSink::new(
            config.event_webhook_url.clone(),
            config.event_webhook_secret.clone(),
        ))
    };

    let (events_tx, _) = broadcast::channel(256);

    let state = Arc::new(AppState {
        db: Arc::clone(&db),
        config: config.clone(),
        clock: Arc::new(SystemClock),
        capabilities: Box::new(SqliteCapabilities::new(db, config.booking_module_default)),
        event_sink,
        events_tx,
    });

    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

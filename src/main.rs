//! Coffeestry POS - multi-tenant coffee shop point of sale server

use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coffeestry_pos::api::{router, AppState};
use coffeestry_pos::config::Config;
use coffeestry_pos::services::{EventSink, IdentityService, LogSink, NatsSink};
use coffeestry_pos::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let store = SqliteStore::connect(&config.database_url, config.db_max_connections, config.request_timeout).await?;
    store.migrate().await?;

    let events: Arc<dyn EventSink> = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => Arc::new(NatsSink::new(client, config.event_subject_prefix.clone())),
            Err(e) => {
                tracing::warn!(%url, error = %e, "NATS unavailable, logging events instead");
                Arc::new(LogSink)
            }
        },
        None => Arc::new(LogSink),
    };

    if let Some((username, password)) = &config.superadmin {
        IdentityService::new(Arc::new(store.clone()), config.bcrypt_cost, config.request_timeout).ensure_superadmin(username, password).await?;
    }

    let app = router(AppState::new(store, events, &config));
    tracing::info!("☕ Coffeestry POS listening on 0.0.0.0:{}", config.port);
    axum::serve(tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?, app).await?;
    Ok(())
}

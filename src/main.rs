use anyhow::{Context, Result};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vod_portal::config::Config;
use vod_portal::types::AppState;
use vod_portal::{app, database, handlers, rate_limit, storage};

const LIMITER_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const UPLOAD_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,vod_portal=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yml".to_string());
    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("loading {}", config_path))?;

    let s3 = storage::s3_client(&config.storage);
    let db_pool = database::initialize_database(&config.database.url).await?;

    let auth_rate_limiter = rate_limit::AuthRateLimiter::new();

    let limiter_clone = auth_rate_limiter.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(LIMITER_CLEANUP_INTERVAL).await;
            limiter_clone.cleanup_old_entries().await;
        }
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server.host/server.port")?;

    let state = AppState {
        config,
        s3,
        db_pool,
        chunked_uploads: Arc::new(RwLock::new(HashMap::new())),
        auth_rate_limiter,
    };

    let sweeper_state = state.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPLOAD_SWEEP_INTERVAL).await;
            handlers::upload::sweep_stale_uploads(&sweeper_state).await;
        }
    });

    let app = app::build_router(state);

    info!("listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;
    Ok(())
}

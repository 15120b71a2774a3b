mod cli;
mod config;
mod error;
mod handlers;
mod mail;
mod storage;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    cli::Cli,
    config::Config,
    handlers::{router, AppState},
    mail::BrevoMailer,
    storage::{MemorySessionStore, RedisSessionStore, SessionStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().apply_cli(&cli);
    info!("Starting Fast Track session store on port {}", config.port);
    info!("Session TTL: {} seconds", config.session_ttl_seconds);

    let store = open_store(&config).await;
    info!(backend = store.backend(), "session store ready");
    if config.brevo.api_key.is_none() {
        warn!("BREVO_API_KEY not set; /email/send-links will fail");
    }
    let mailer = BrevoMailer::new(config.brevo.clone()).context("failed to build mail client")?;

    let app = router(AppState {
        store,
        mailer: Arc::new(mailer),
        public_base_url: config.public_base_url.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Fast Track listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

/// Redis when configured and reachable, otherwise process memory.
async fn open_store(config: &Config) -> Arc<dyn SessionStore> {
    if let Some(url) = &config.redis_url {
        match RedisSessionStore::connect(url, config.session_ttl_seconds).await {
            Ok(store) => return Arc::new(store),
            Err(err) => warn!(error = %err, "failed to connect to Redis; using in-memory store"),
        }
    } else {
        warn!("REDIS_URL not set; sessions are kept in memory only");
    }
    Arc::new(MemorySessionStore::new(config.session_ttl_seconds))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

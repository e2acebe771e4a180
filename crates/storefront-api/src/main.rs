//! Storefront API Server
//!
//! Configuration comes from the environment, optionally layered over a TOML
//! file named by `STOREFRONT_CONFIG`.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use std::sync::Arc;
use storefront_api::{create_router, state::AppState};
use storefront_core::{AppConfig, LoggingConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "storefront_api={level},storefront_core={level},audit=info,tower_http=info",
            level = logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var("STOREFRONT_CONFIG") {
        Ok(path) => AppConfig::from_file(&path)
            .with_context(|| format!("loading {path}"))?
            .with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(
        cache_backend = ?config.cache.backend,
        sealed_fields = ?config.auth.sealable_fields,
        header = %config.auth.header_name,
        "Starting Storefront API"
    );

    let state = Arc::new(AppState::from_config(config).await?);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Storefront API listening on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

mod config;
mod constants;
mod inference;
mod logging;
mod models;
mod routes;
mod services;
mod storage;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::CorsLayer;

use config::Config;
use constants::{RATE_LIMIT_BURST, RATE_LIMIT_REPLENISH_SECS};
use services::moderation::Moderator;

pub struct AppState {
    pub moderator: Moderator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = Config::from_env();
    log::info!(
        "[startup] backend={:?} threshold={} concurrency={}",
        config.backend,
        config.detection_threshold,
        config.batch_concurrency
    );

    let moderator = Moderator::from_config(&config)
        .await
        .context("initializing moderation pipeline")?;

    let state = Arc::new(AppState { moderator });

    let rate_limit_config = GovernorConfigBuilder::default()
        .per_second(RATE_LIMIT_REPLENISH_SECS)
        .burst_size(RATE_LIMIT_BURST)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .context("building rate limit config")?;

    let app = routes::build_routes()
        .layer(GovernorLayer {
            config: rate_limit_config.into(),
        })
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    log::info!("[startup] Listening on http://{}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server failed")?;
    Ok(())
}

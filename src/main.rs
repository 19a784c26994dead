// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::application::dashboard_service::DashboardService;
use crate::application::streaming_service::StreamingDashboardService;
use crate::application::unit_service::UnitService;
use crate::domain::clock::SystemClock;
use crate::domain::window::TimeWindowResolver;
use crate::infrastructure::config::load_app_config;
use crate::infrastructure::http_backend::HttpBackend;
use crate::infrastructure::logging;
use crate::infrastructure::ws_transport::WsTransport;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{health_check, list_units, set_visibility, stream_dashboard, suggest_window};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_app_config().context("failed to load configuration")?;
    logging::init(&config.logging.filter);

    let zone = config.zone()?;
    let schedule = Arc::new(config.shift_schedule().context("invalid shift schedule")?);
    let resolver = TimeWindowResolver::new(zone);
    let clock = Arc::new(SystemClock);

    // Create backend adapters (infrastructure layer)
    let backend = Arc::new(HttpBackend::new(&config.backend.http_base_url));
    let transport = Arc::new(WsTransport::new(&config.backend.ws_base_url()));

    // Create services (application layer)
    let settings = config.session_settings();
    let unit_service = UnitService::new(backend.clone());
    let history = DashboardService::new(
        backend,
        schedule.clone(),
        resolver,
        clock.clone(),
        config.request_timeout(),
        settings.deduct_breaks,
    );
    let streaming_service = StreamingDashboardService::new(transport, history, schedule, resolver, clock, settings);

    let state = Arc::new(AppState {
        unit_service,
        streaming_service,
    });

    // Build router (presentation layer)
    // The dashboard stream compresses its frames itself, so only the JSON routes get CompressionLayer
    let json_routes = Router::new()
        .route("/units", get(list_units))
        .route("/window", get(suggest_window))
        .layer(CompressionLayer::new());
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/dashboard", get(stream_dashboard))
        .route("/sessions/:id/visibility", post(set_visibility))
        .merge(json_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    tracing::info!(%addr, backend = %config.backend.http_base_url, "starting production-dashboard");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router).await?;

    Ok(())
}

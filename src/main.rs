mod api;
mod config;
mod engine;
mod error;
mod fare;
mod geo;
mod matching;
mod models;
mod notify;
mod observability;
mod state;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    let config = config::Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let http_port = config.http_port;
    let (app_state, dispatch_rx) = state::AppState::new(config);
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    tokio::spawn(engine::dispatch::run_dispatch_engine(
        shared_state.clone(),
        dispatch_rx,
    ));
    tokio::spawn(engine::expiry::run_expiry_sweeper(shared_state.clone()));

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| error::AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| error::AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}

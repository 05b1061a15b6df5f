mod appointment_number;
mod audit;
mod booking;
mod config;
mod db;
mod error;
mod lifecycle;
mod mailer;
mod middleware;
mod models;
mod mutations;
mod qr;
mod routes;
mod scheduling;
mod side_effects;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::{config::Config, mailer::SmtpMailer, models::AppState};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url, cfg.db_max_connections).await?;
    if cfg.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let mailer = SmtpMailer::from_config(&cfg.smtp)?;

    let state = AppState {
        db: pool,
        clinic: cfg.clinic.clone(),
        outbox: cfg.outbox.clone(),
        mailer: Arc::new(mailer),
    };

    let worker = side_effects::spawn_worker(state.clone());

    // Browser booking form is served from another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}

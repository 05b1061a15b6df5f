use crate::models::AppState;
use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

pub mod appointment_routes;
pub mod referral_routes;
pub mod service_routes;
pub mod slot_routes;

async fn health() -> Json<Value> {
    Json(json!({ "success": true }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1/appointments",
            appointment_routes::router().merge(slot_routes::router()),
        )
        .nest("/api/v1/services", service_routes::router())
        .nest("/api/v1/referrals", referral_routes::router())
        .route("/health", get(health))
        .with_state(state)
}

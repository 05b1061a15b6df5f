// src/routes/service_routes.rs

use axum::{Json, Router, extract::State, routing::get};

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, ServiceRow},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_services))
}

pub async fn list_services(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<ServiceRow>>, ApiError> {
    let rows: Vec<ServiceRow> = sqlx::query_as::<_, ServiceRow>(
        r#"
        SELECT
          id,
          service_code,
          name,
          catalog_version,
          is_active
        FROM services
        WHERE is_active = true
        ORDER BY id ASC
        "#,
    )
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

// src/routes/referral_routes.rs

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::ApiError,
    middleware::{auth_context::AuthContext, body::optional_id},
    models::{AppState, ReferralRow},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/active", get(list_active_referrals))
}

#[derive(Debug, Deserialize)]
pub struct ActiveReferralsQuery {
    #[serde(default, deserialize_with = "optional_id")]
    pub patient_id: Option<i64>,
}

/// Referrals a booking may still be attached to.
pub async fn list_active_referrals(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<ActiveReferralsQuery>,
) -> Result<Json<Vec<ReferralRow>>, ApiError> {
    let patient_id = auth.resolve_patient(q.patient_id)?;

    let rows = sqlx::query_as::<_, ReferralRow>(
        r#"
        SELECT
          id,
          referral_num,
          patient_id,
          destination_facility_id,
          external_facility_name,
          referral_reason,
          status,
          created_at
        FROM referrals
        WHERE patient_id = $1
          AND status = 'active'
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(patient_id)
    .fetch_all(&state.db)
    .await
    .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(rows))
}

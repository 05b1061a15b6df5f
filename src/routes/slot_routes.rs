// src/routes/slot_routes.rs

use std::collections::BTreeMap;

use axum::{extract::State, routing::post, Json, Router};
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    booking,
    error::ApiError,
    middleware::{auth_context::AuthContext, body::JsonOrForm},
    models::{AppState, FacilityCategory},
    routes::appointment_routes::{parse_category, parse_service},
    scheduling::{self, SlotAvailability},
};

pub fn router() -> Router<AppState> {
    Router::new().route("/check_slot_availability", post(check_slot_availability))
}

#[derive(Debug, Deserialize)]
pub struct SlotAvailabilityRequest {
    pub date: String,
    pub service: String,
    pub facility_type: String,
}

#[derive(Debug, Serialize)]
pub struct SlotAvailabilityResponse {
    pub success: bool,
    pub availability: BTreeMap<String, i64>,
    pub full_slots: Vec<String>,
    pub max_per_slot: i64,
}

impl From<SlotAvailability> for SlotAvailabilityResponse {
    fn from(slots: SlotAvailability) -> Self {
        Self {
            success: true,
            full_slots: slots.full_slots(),
            max_per_slot: slots.capacity,
            availability: slots.counts,
        }
    }
}

async fn booked_counts(
    state: &AppState,
    date: NaiveDate,
    service_id: i64,
    category: FacilityCategory,
) -> Result<Vec<(NaiveTime, i64)>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT a.scheduled_time, COUNT(*) AS booked
        FROM appointments a
        JOIN facilities f ON f.id = a.facility_id
        WHERE a.scheduled_date = $1
          AND a.service_id = $2
          AND f.facility_type = $3
          AND a.status NOT IN ('cancelled', 'completed')
        GROUP BY a.scheduled_time
        "#,
    )
    .bind(date)
    .bind(service_id)
    .bind(category.facility_type())
    .fetch_all(&state.db)
    .await
}

pub async fn check_slot_availability(
    State(state): State<AppState>,
    _auth: AuthContext,
    JsonOrForm(req): JsonOrForm<SlotAvailabilityRequest>,
) -> Result<Json<SlotAvailabilityResponse>, ApiError> {
    let date = scheduling::parse_date(&req.date, "date")?;
    scheduling::ensure_future_date(date, state.clinic.offset(), Utc::now())?;
    let code = parse_service(&req.service)?;
    let category = parse_category(&req.facility_type)?;

    let mut conn = state
        .db
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    let service = booking::resolve_service(&mut conn, code).await?;
    drop(conn);

    let rows = booked_counts(&state, date, service.id, category)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    Ok(Json(SlotAvailability::from_counts(rows, state.clinic.slot_capacity).into()))
}

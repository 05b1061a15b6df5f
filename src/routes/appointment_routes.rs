// src/routes/appointment_routes.rs

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{
    appointment_number::AppointmentRef,
    audit::Actor,
    booking::{self, BookingRequest},
    error::{ApiError, AppointmentError},
    middleware::{
        auth_context::AuthContext,
        body::{optional_id, JsonOrForm},
        client_meta::ClientMeta,
    },
    models::{AppState, AppointmentStatus, FacilityCategory, ServiceCode},
    mutations,
    scheduling,
    side_effects,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/submit", post(submit_appointment))
        .route("/cancel", post(cancel_appointment))
        .route("/update_status", post(update_status))
        .route("/qr_code", get(get_qr_code))
}

fn actor_for(auth: &AuthContext, client: ClientMeta) -> Actor {
    Actor {
        actor_type: auth.actor_type(),
        user_id: Some(auth.user_id),
        client,
    }
}

pub fn parse_service(raw: &str) -> Result<ServiceCode, ApiError> {
    raw.parse::<ServiceCode>()
        .map_err(|_| ApiError::validation(format!("Unknown service: {}", raw.trim())))
}

pub fn parse_category(raw: &str) -> Result<FacilityCategory, ApiError> {
    raw.trim()
        .to_ascii_lowercase()
        .parse::<FacilityCategory>()
        .map_err(|_| ApiError::validation("facility_type must be one of bhc, dho, cho"))
}

/* ============================================================
   Submit
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SubmitAppointmentRequest {
    #[serde(default, deserialize_with = "optional_id")]
    pub patient_id: Option<i64>,
    pub service: String,
    pub facility_type: String,
    pub appointment_date: String,
    pub appointment_time: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub referral_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitAppointmentResponse {
    pub success: bool,
    pub message: String,
    pub appointment_id: i64,
    pub appointment_num: String,
    pub facility_name: String,
    pub has_queue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_number: Option<i32>,
    pub qr_generated: bool,
    pub email_sent: bool,
    pub email_message: String,
}

fn booking_request(auth: &AuthContext, req: &SubmitAppointmentRequest) -> Result<BookingRequest, ApiError> {
    Ok(BookingRequest {
        patient_id: auth.resolve_patient(req.patient_id)?,
        service: parse_service(&req.service)?,
        category: parse_category(&req.facility_type)?,
        date: scheduling::parse_date(&req.appointment_date, "appointment_date")?,
        time: scheduling::parse_time(&req.appointment_time, "appointment_time")?,
        referral_id: req.referral_id,
    })
}

pub async fn submit_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    client: ClientMeta,
    JsonOrForm(req): JsonOrForm<SubmitAppointmentRequest>,
) -> Result<Json<SubmitAppointmentResponse>, ApiError> {
    let booking = booking_request(&auth, &req)?;
    let actor = actor_for(&auth, client);

    let booked = booking::create_appointment(&state.db, &state.clinic, &booking, &actor).await?;

    // patients book for themselves; the queue ticket then belongs to the system user
    let created_by = auth.is_staff().then_some(auth.user_id);
    let report = side_effects::run_after_booking(&state, booked.event_id, created_by).await;

    Ok(Json(SubmitAppointmentResponse {
        success: true,
        message: "Appointment booked successfully".into(),
        appointment_id: booked.appointment_id,
        appointment_num: booked.appointment_num.into_string(),
        facility_name: booked.facility.name,
        has_queue: report.has_queue(),
        queue_number: report.queue_number,
        qr_generated: report.qr_generated,
        email_sent: report.email_sent,
        email_message: report.email_message,
    }))
}

/* ============================================================
   Cancel / status update
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct CancelAppointmentRequest {
    pub appointment_id: AppointmentRef,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelAppointmentResponse {
    pub success: bool,
    pub message: String,
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    client: ClientMeta,
    JsonOrForm(req): JsonOrForm<CancelAppointmentRequest>,
) -> Result<Json<CancelAppointmentResponse>, ApiError> {
    let actor = actor_for(&auth, client);

    mutations::change_status(
        &state.db,
        &state.clinic,
        req.appointment_id.0,
        AppointmentStatus::Cancelled,
        req.cancellation_reason.as_deref(),
        &actor,
        |row| {
            if auth.is_staff() || auth.patient_id == Some(row.patient_id) {
                Ok(())
            } else {
                Err(AppointmentError::Forbidden(
                    "You can only cancel your own appointments".into(),
                ))
            }
        },
    )
    .await?;

    Ok(Json(CancelAppointmentResponse {
        success: true,
        message: "Appointment cancelled successfully".into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub appointment_id: AppointmentRef,
    pub new_status: String,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub success: bool,
    pub message: String,
    pub old_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
}

pub async fn update_status(
    State(state): State<AppState>,
    auth: AuthContext,
    client: ClientMeta,
    JsonOrForm(req): JsonOrForm<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, ApiError> {
    auth.ensure_staff()?;

    let target = req
        .new_status
        .trim()
        .to_ascii_lowercase()
        .parse::<AppointmentStatus>()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let actor = actor_for(&auth, client);

    let change = mutations::change_status(
        &state.db,
        &state.clinic,
        req.appointment_id.0,
        target,
        req.cancellation_reason.as_deref(),
        &actor,
        |_| Ok(()),
    )
    .await?;

    Ok(Json(UpdateStatusResponse {
        success: true,
        message: format!("Appointment status updated to {}", change.new_status),
        old_status: change.old_status,
        new_status: change.new_status,
    }))
}

/* ============================================================
   QR code
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct QrCodeQuery {
    pub appointment_id: AppointmentRef,
}

#[derive(Debug, Serialize)]
pub struct QrCodeResponse {
    pub success: bool,
    /// `data:image/png;base64,...`
    pub qr_image: String,
    pub appointment_id: i64,
    pub appointment_num: Option<String>,
    pub status: String,
    pub scheduled_date: NaiveDate,
    #[serde(serialize_with = "serialize_hhmm")]
    pub scheduled_time: NaiveTime,
}

fn serialize_hhmm<S: serde::Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&scheduling::format_slot(*t))
}

pub async fn get_qr_code(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<QrCodeQuery>,
) -> Result<Json<QrCodeResponse>, ApiError> {
    let ctx = side_effects::load_context(&state.db, q.appointment_id.0)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or(AppointmentError::NotFound)?;

    auth.ensure_can_access_patient(ctx.patient_id)?;

    let png = side_effects::ensure_qr_code(&state.db, &ctx)
        .await
        .map_err(|e| ApiError::Internal(format!("qr code error: {e}")))?;

    Ok(Json(QrCodeResponse {
        success: true,
        qr_image: format!("data:image/png;base64,{}", STANDARD.encode(&png)),
        appointment_id: ctx.id,
        appointment_num: ctx.appointment_num,
        status: ctx.status,
        scheduled_date: ctx.scheduled_date,
        scheduled_time: ctx.scheduled_time,
    }))
}

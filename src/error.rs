use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Every failure leaves the service as `{success: false, message, error_code}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error_code: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            success: false,
            message: message.to_string(),
            error_code: code.to_string(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => {
                // detail stays in the server log
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::to_error_response(
                        "INTERNAL",
                        "An unexpected error occurred. Please try again later.",
                    ),
                )
                    .into_response()
            }
        }
    }
}

/// Failures of the booking and status workflows that abort the request.
#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid referral or referral does not belong to this patient")]
    InvalidReferral,
    #[error("Referral is not active (current status: {0})")]
    InactiveReferral(String),
    #[error("No facility found for the selected facility type")]
    NoFacilityFound,
    #[error("You already have an appointment scheduled at this date and time")]
    DuplicateBooking,
    #[error("The selected time slot is fully booked")]
    SlotFull,
    #[error("Patient not found")]
    PatientNotFound,
    #[error("Appointment not found")]
    NotFound,
    #[error("{0}")]
    NotCancellable(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("database error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl AppointmentError {
    pub fn code(&self) -> &'static str {
        match self {
            AppointmentError::Validation(_) => "VALIDATION_ERROR",
            AppointmentError::InvalidReferral => "INVALID_REFERRAL",
            AppointmentError::InactiveReferral(_) => "INACTIVE_REFERRAL",
            AppointmentError::NoFacilityFound => "NO_FACILITY_FOUND",
            AppointmentError::DuplicateBooking => "DUPLICATE_BOOKING",
            AppointmentError::SlotFull => "SLOT_FULL",
            AppointmentError::PatientNotFound => "PATIENT_NOT_FOUND",
            AppointmentError::NotFound => "NOT_FOUND",
            AppointmentError::NotCancellable(_) => "NOT_CANCELLABLE",
            AppointmentError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppointmentError::Forbidden(_) => "FORBIDDEN",
            AppointmentError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl From<AppointmentError> for ApiError {
    fn from(e: AppointmentError) -> Self {
        let code = e.code();
        match e {
            AppointmentError::Validation(_)
            | AppointmentError::InvalidReferral
            | AppointmentError::InactiveReferral(_)
            | AppointmentError::NoFacilityFound
            | AppointmentError::NotCancellable(_)
            | AppointmentError::InvalidTransition(_) => ApiError::BadRequest(code, e.to_string()),
            AppointmentError::DuplicateBooking | AppointmentError::SlotFull => {
                ApiError::Conflict(code, e.to_string())
            }
            AppointmentError::PatientNotFound | AppointmentError::NotFound => {
                ApiError::NotFound(code, e.to_string())
            }
            AppointmentError::Forbidden(_) => ApiError::Forbidden(code, e.to_string()),
            AppointmentError::Persistence(err) => ApiError::Internal(format!("db error: {err}")),
        }
    }
}

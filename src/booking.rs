//! Booking workflow: referral check, facility resolution and the
//! transactional appointment insert.

use chrono::{NaiveDate, NaiveTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::appointment_number::AppointmentNumber;
use crate::audit::{self, Actor, LogEntry};
use crate::config::ClinicConfig;
use crate::error::AppointmentError;
use crate::models::{
    AppointmentStatus, FacilityCategory, FacilityRow, PatientRow, ReferralRow, ReferralStatus,
    SERVICE_CATALOG_VERSION, ServiceCode, ServiceRow,
};
use crate::scheduling;
use crate::side_effects;

const DUPLICATE_SLOT_CONSTRAINT: &str = "uq_appointments_patient_slot";

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub patient_id: i64,
    pub service: ServiceCode,
    pub category: FacilityCategory,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub referral_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct BookedAppointment {
    pub appointment_id: i64,
    pub appointment_num: AppointmentNumber,
    pub facility: FacilityRow,
    pub event_id: i64,
}

pub async fn load_patient(conn: &mut PgConnection, patient_id: i64) -> Result<PatientRow, AppointmentError> {
    sqlx::query_as::<_, PatientRow>(
        r#"
        SELECT id, barangay_id
        FROM patients
        WHERE id = $1
        "#,
    )
    .bind(patient_id)
    .fetch_optional(conn)
    .await?
    .ok_or(AppointmentError::PatientNotFound)
}

/// Maps a catalog code to its active row.
pub async fn resolve_service(conn: &mut PgConnection, code: ServiceCode) -> Result<ServiceRow, AppointmentError> {
    sqlx::query_as::<_, ServiceRow>(
        r#"
        SELECT id, service_code, name, catalog_version, is_active
        FROM services
        WHERE service_code = $1
          AND catalog_version = $2
          AND is_active = true
        "#,
    )
    .bind(code.code())
    .bind(SERVICE_CATALOG_VERSION)
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| {
        AppointmentError::Validation(format!("Service {} is not currently offered", code.display_name()))
    })
}

pub fn ensure_referral_usable(referral: &ReferralRow) -> Result<(), AppointmentError> {
    match referral.status.parse::<ReferralStatus>() {
        Ok(ReferralStatus::Active) => Ok(()),
        _ => Err(AppointmentError::InactiveReferral(referral.status.clone())),
    }
}

/// No id means a booking without referral. Read-only.
pub async fn validate_referral(
    conn: &mut PgConnection,
    referral_id: Option<i64>,
    patient_id: i64,
) -> Result<Option<ReferralRow>, AppointmentError> {
    let Some(referral_id) = referral_id else {
        return Ok(None);
    };

    let referral = sqlx::query_as::<_, ReferralRow>(
        r#"
        SELECT id, referral_num, patient_id, destination_facility_id,
               external_facility_name, referral_reason, status, created_at
        FROM referrals
        WHERE id = $1
          AND patient_id = $2
        "#,
    )
    .bind(referral_id)
    .bind(patient_id)
    .fetch_optional(conn)
    .await?
    .ok_or(AppointmentError::InvalidReferral)?;

    ensure_referral_usable(&referral)?;
    Ok(Some(referral))
}

async fn main_city_health_office(conn: &mut PgConnection) -> Result<Option<FacilityRow>, sqlx::Error> {
    sqlx::query_as::<_, FacilityRow>(
        r#"
        SELECT id, name, facility_type, requires_queue
        FROM facilities
        WHERE is_main = true
          AND is_active = true
        LIMIT 1
        "#,
    )
    .fetch_optional(conn)
    .await
}

/// Barangay center or district office of the patient's catchment area,
/// falling back to the main City Health Office.
pub async fn resolve_facility(
    conn: &mut PgConnection,
    category: FacilityCategory,
    barangay_id: Option<i64>,
) -> Result<FacilityRow, AppointmentError> {
    let local = match (category, barangay_id) {
        (FacilityCategory::Bhc, Some(barangay_id)) => {
            sqlx::query_as::<_, FacilityRow>(
                r#"
                SELECT id, name, facility_type, requires_queue
                FROM facilities
                WHERE facility_type = $1
                  AND barangay_id = $2
                  AND is_active = true
                ORDER BY id ASC
                LIMIT 1
                "#,
            )
            .bind(category.facility_type())
            .bind(barangay_id)
            .fetch_optional(&mut *conn)
            .await?
        }
        (FacilityCategory::Dho, Some(barangay_id)) => {
            sqlx::query_as::<_, FacilityRow>(
                r#"
                SELECT f.id, f.name, f.facility_type, f.requires_queue
                FROM facilities f
                JOIN barangays b ON b.district_id = f.district_id
                WHERE b.id = $2
                  AND f.facility_type = $1
                  AND f.is_active = true
                ORDER BY f.id ASC
                LIMIT 1
                "#,
            )
            .bind(category.facility_type())
            .bind(barangay_id)
            .fetch_optional(&mut *conn)
            .await?
        }
        _ => None,
    };

    if let Some(f) = local {
        return Ok(f);
    }
    if category != FacilityCategory::Cho {
        tracing::info!(?category, ?barangay_id, "no local facility; falling back to main CHO");
    }
    main_city_health_office(conn)
        .await?
        .ok_or(AppointmentError::NoFacilityFound)
}

/// Live bookings at one (date, service, facility type, time) slot.
pub async fn count_slot_bookings(
    conn: &mut PgConnection,
    date: NaiveDate,
    service_id: i64,
    facility_type: &str,
    time: NaiveTime,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM appointments a
        JOIN facilities f ON f.id = a.facility_id
        WHERE a.scheduled_date = $1
          AND a.service_id = $2
          AND f.facility_type = $3
          AND a.scheduled_time = $4
          AND a.status NOT IN ('cancelled', 'completed')
        "#,
    )
    .bind(date)
    .bind(service_id)
    .bind(facility_type)
    .bind(time)
    .fetch_one(conn)
    .await
}

pub fn slot_lock_key(date: NaiveDate, service_id: i64, facility_type: &str, time: NaiveTime) -> String {
    format!(
        "slot:{}:{}:{}:{}",
        date.format("%Y-%m-%d"),
        service_id,
        facility_type,
        time.format("%H:%M")
    )
}

/// Transaction-scoped advisory lock, released on commit/rollback.
pub async fn advisory_lock(conn: &mut PgConnection, key: &str) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

fn map_insert_error(e: sqlx::Error) -> AppointmentError {
    let duplicate = e
        .as_database_error()
        .and_then(|d| d.constraint())
        .is_some_and(|c| c == DUPLICATE_SLOT_CONSTRAINT);
    if duplicate {
        AppointmentError::DuplicateBooking
    } else {
        AppointmentError::Persistence(e)
    }
}

/// Validates and writes the appointment in one transaction, together with
/// its number, the `created` audit row and the side-effect outbox event.
pub async fn create_appointment(
    pool: &PgPool,
    clinic: &ClinicConfig,
    req: &BookingRequest,
    actor: &Actor,
) -> Result<BookedAppointment, AppointmentError> {
    let now = Utc::now();
    scheduling::ensure_future_date(req.date, clinic.offset(), now)?;
    scheduling::ensure_bookable_time(req.time)?;

    let mut tx = pool.begin().await?;

    let patient = load_patient(&mut tx, req.patient_id).await?;
    let referral = validate_referral(&mut tx, req.referral_id, patient.id).await?;
    let service = resolve_service(&mut tx, req.service).await?;
    let facility = resolve_facility(&mut tx, req.category, patient.barangay_id).await?;

    let duplicate: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT id
        FROM appointments
        WHERE patient_id = $1
          AND scheduled_date = $2
          AND scheduled_time = $3
          AND status NOT IN ('cancelled', 'completed')
        LIMIT 1
        "#,
    )
    .bind(patient.id)
    .bind(req.date)
    .bind(req.time)
    .fetch_optional(&mut *tx)
    .await?;
    if duplicate.is_some() {
        return Err(AppointmentError::DuplicateBooking);
    }

    // serialize bookings for this slot so the ceiling holds under concurrency
    advisory_lock(
        &mut tx,
        &slot_lock_key(req.date, service.id, &facility.facility_type, req.time),
    )
    .await?;
    let booked = count_slot_bookings(&mut tx, req.date, service.id, &facility.facility_type, req.time).await?;
    if !scheduling::slot_has_room(booked, clinic.slot_capacity) {
        tracing::info!(date = %req.date, time = %req.time, booked, "slot full");
        return Err(AppointmentError::SlotFull);
    }

    let appointment_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO appointments (
          patient_id, facility_id, service_id, referral_id,
          scheduled_date, scheduled_time, status
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7)
        RETURNING id
        "#,
    )
    .bind(patient.id)
    .bind(facility.id)
    .bind(service.id)
    .bind(referral.as_ref().map(|r| r.id))
    .bind(req.date)
    .bind(req.time)
    .bind(AppointmentStatus::Confirmed.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(map_insert_error)?;

    let appointment_num =
        AppointmentNumber::new(scheduling::local_today(clinic.offset(), now), appointment_id);

    sqlx::query(
        r#"
        UPDATE appointments
        SET appointment_num = $2
        WHERE id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(appointment_num.as_str())
    .execute(&mut *tx)
    .await?;

    audit::append(
        &mut tx,
        LogEntry {
            appointment_id,
            patient_id: patient.id,
            action: "created",
            old_status: None,
            new_status: Some(AppointmentStatus::Confirmed),
            reason: None,
        },
        actor,
    )
    .await?;

    let event_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO appointment_events (appointment_id, event_type, next_attempt_at)
        VALUES ($1, 'appointment_created', now() + make_interval(secs => $2))
        RETURNING id
        "#,
    )
    .bind(appointment_id)
    // the request runs the first pass; the worker only picks up leftovers
    .bind(side_effects::EVENT_LEASE_SECS)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        appointment_id,
        appointment_num = %appointment_num,
        facility_id = facility.id,
        patient_id = patient.id,
        "appointment booked"
    );

    Ok(BookedAppointment {
        appointment_id,
        appointment_num,
        facility,
        event_id,
    })
}

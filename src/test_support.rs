//! Fixtures for the database scenarios.
//!
//! Scenarios marked `#[ignore = "requires DATABASE_URL"]` run against a
//! scratch database that `#[sqlx::test]` builds from ./migrations:
//!
//!     DATABASE_URL=postgres://localhost/postgres cargo test -- --ignored

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::booking::BookingRequest;
use crate::config::{ClinicConfig, OutboxConfig};
use crate::mailer::{DeliveryOutcome, MailError, Mailer, OutgoingEmail};
use crate::models::{AppState, FacilityCategory, ServiceCode};
use crate::scheduling;

/// Facility 1 is the main CHO (queued), 2 a BHC in barangay 1, 3 the DHO of
/// district 1. Patient 7 lives in barangay 1; patient 8 is a senior in a
/// barangay without district. Referral 3 is active, 4 accepted (both of
/// patient 7), 5 belongs to patient 8.
pub async fn seed(pool: &PgPool) -> sqlx::Result<()> {
    sqlx::raw_sql(
        r#"
        INSERT INTO districts (id, name) VALUES (1, 'District 1');
        INSERT INTO barangays (id, name, district_id) VALUES (1, 'Zone I', 1), (2, 'Zone II', NULL);
        INSERT INTO facilities (id, name, facility_type, barangay_id, district_id, is_main, requires_queue)
        VALUES
          (1, 'City Health Office - Main', 'City Health Office', NULL, NULL, true, true),
          (2, 'Zone I Barangay Health Center', 'Barangay Health Center', 1, 1, false, false),
          (3, 'District 1 Health Office', 'District Health Office', NULL, 1, false, false);
        INSERT INTO patients (id, first_name, last_name, email, barangay_id, is_senior, is_pwd)
        VALUES
          (7, 'Juan', 'Dela Cruz', 'juan@example.org', 1, false, false),
          (8, 'Maria', 'Santos', NULL, 2, true, false);
        INSERT INTO referrals (id, referral_num, patient_id, status)
        VALUES
          (3, 'REF-0003', 7, 'active'),
          (4, 'REF-0004', 7, 'accepted'),
          (5, 'REF-0005', 8, 'active');
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub fn clinic() -> ClinicConfig {
    ClinicConfig {
        utc_offset_hours: 8,
        slot_capacity: 20,
        allow_pending_status: false,
        system_user_id: Uuid::from_u128(1),
    }
}

pub fn tomorrow() -> NaiveDate {
    scheduling::local_today(clinic().offset(), Utc::now()) + Duration::days(1)
}

pub fn nine_am() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 0, 0).expect("valid time")
}

pub fn booking_request(
    patient_id: i64,
    category: FacilityCategory,
    referral_id: Option<i64>,
) -> BookingRequest {
    BookingRequest {
        patient_id,
        service: ServiceCode::PrimaryCare,
        category,
        date: tomorrow(),
        time: nine_am(),
        referral_id,
    }
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<DeliveryOutcome, MailError> {
        self.sent.lock().expect("mailer lock").push(email);
        Ok(DeliveryOutcome::Sent)
    }
}

pub fn state(pool: PgPool, mailer: Arc<RecordingMailer>) -> AppState {
    AppState {
        db: pool,
        clinic: clinic(),
        outbox: OutboxConfig {
            poll_secs: 1,
            max_attempts: 3,
            batch_size: 10,
        },
        mailer,
    }
}

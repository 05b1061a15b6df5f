//! Best-effort work that follows a committed booking: QR artifact, queue
//! ticket and confirmation email.
//!
//! The booking transaction writes an `appointment_created` row into
//! `appointment_events`. The request handler runs the steps once right after
//! commit; whatever did not finish is retried by the outbox worker. Step
//! failures are logged and never undo the booking.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::booking::advisory_lock;
use crate::mailer::{self, ConfirmationDetails, DeliveryOutcome, MailError};
use crate::models::{AppState, AppointmentStatus, QueuePriority};
use crate::qr::{self, QR_PAYLOAD_VERSION, QrError, QrPayload};

const QUEUE_TYPE_CONSULTATION: &str = "consultation";
const LIVE_QUEUE_CONSTRAINT: &str = "uq_queue_entries_live";

/// How long a claimed event stays with its holder. New events start with
/// the same delay so the worker does not race the request's inline pass.
pub const EVENT_LEASE_SECS: f64 = 120.0;

#[derive(Debug, thiserror::Error)]
pub enum SideEffectError {
    #[error(transparent)]
    Qr(#[from] QrError),
    #[error("queue entry: {0}")]
    Queue(String),
    #[error(transparent)]
    Email(#[from] MailError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Informational flags returned with the booking.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SideEffectReport {
    pub qr_generated: bool,
    pub queue_number: Option<i32>,
    pub email_sent: bool,
    pub email_message: String,
}

impl SideEffectReport {
    pub fn has_queue(&self) -> bool {
        self.queue_number.is_some()
    }
}

/// Everything the three steps need about one appointment.
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentContext {
    pub id: i64,
    pub appointment_num: Option<String>,
    pub patient_id: i64,
    pub referral_id: Option<i64>,
    pub referral_num: Option<String>,
    pub facility_id: i64,
    pub facility_name: String,
    pub facility_type: String,
    pub requires_queue: bool,
    pub service_name: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub is_senior: bool,
    pub is_pwd: bool,
}

impl AppointmentContext {
    pub fn qr_payload(&self) -> QrPayload {
        QrPayload {
            kind: "appointment",
            version: QR_PAYLOAD_VERSION,
            appointment_id: self.id,
            appointment_num: self.appointment_num.clone(),
            patient_id: self.patient_id,
            referral_id: self.referral_id,
            facility_id: self.facility_id,
            facility_type: self.facility_type.clone(),
            scheduled_date: self.scheduled_date,
            scheduled_time: self.scheduled_time,
            issued_at: self.created_at,
        }
    }

    pub fn patient_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    fn is_confirmed(&self) -> bool {
        self.status.parse::<AppointmentStatus>() == Ok(AppointmentStatus::Confirmed)
    }
}

pub async fn load_context(pool: &PgPool, appointment_id: i64) -> Result<Option<AppointmentContext>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentContext>(
        r#"
        SELECT
          a.id,
          a.appointment_num,
          a.patient_id,
          a.referral_id,
          r.referral_num,
          a.facility_id,
          f.name AS facility_name,
          f.facility_type,
          f.requires_queue,
          s.name AS service_name,
          a.scheduled_date,
          a.scheduled_time,
          a.status,
          a.created_at,
          p.first_name,
          p.last_name,
          p.email,
          p.is_senior,
          p.is_pwd
        FROM appointments a
        JOIN facilities f ON f.id = a.facility_id
        JOIN services s ON s.id = a.service_id
        JOIN patients p ON p.id = a.patient_id
        LEFT JOIN referrals r ON r.id = a.referral_id
        WHERE a.id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await
}

/* ============================================================
   QR artifact
   ============================================================ */

pub async fn stored_qr(pool: &PgPool, appointment_id: i64) -> Result<Option<Vec<u8>>, sqlx::Error> {
    let png: Option<Option<Vec<u8>>> = sqlx::query_scalar(
        r#"
        SELECT qr_code_png
        FROM appointments
        WHERE id = $1
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await?;
    Ok(png.flatten())
}

/// Returns the stored PNG, rendering and storing it first if missing.
/// The first stored image wins, so every later read sees the same bytes.
pub async fn ensure_qr_code(pool: &PgPool, ctx: &AppointmentContext) -> Result<Vec<u8>, SideEffectError> {
    if let Some(png) = stored_qr(pool, ctx.id).await? {
        return Ok(png);
    }

    let png = qr::render_png(&ctx.qr_payload())?;
    sqlx::query(
        r#"
        UPDATE appointments
        SET qr_code_png = $2
        WHERE id = $1
          AND qr_code_png IS NULL
        "#,
    )
    .bind(ctx.id)
    .bind(&png)
    .execute(pool)
    .await?;

    tracing::debug!(appointment_id = ctx.id, bytes = png.len(), "qr code stored");
    Ok(stored_qr(pool, ctx.id).await?.unwrap_or(png))
}

/* ============================================================
   Queue ticket
   ============================================================ */

/// Current status, row-locked so a concurrent cancellation either commits
/// first or waits for us.
async fn lock_status(conn: &mut sqlx::PgConnection, appointment_id: i64) -> Result<Option<AppointmentStatus>, sqlx::Error> {
    let status: Option<String> = sqlx::query_scalar(
        r#"
        SELECT status
        FROM appointments
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(conn)
    .await?;
    Ok(status.and_then(|s| s.parse().ok()))
}

async fn still_confirmed(pool: &PgPool, appointment_id: i64) -> Result<bool, sqlx::Error> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM appointments WHERE id = $1")
        .bind(appointment_id)
        .fetch_optional(pool)
        .await?;
    Ok(status.and_then(|s| s.parse().ok()) == Some(AppointmentStatus::Confirmed))
}

async fn live_queue_number(conn: &mut sqlx::PgConnection, appointment_id: i64) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT queue_number
        FROM queue_entries
        WHERE appointment_id = $1
          AND status IN ('waiting', 'in_progress')
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(conn)
    .await
}

/// One live ticket per appointment, only at facilities that run a queue.
pub async fn ensure_queue_entry(
    pool: &PgPool,
    ctx: &AppointmentContext,
    created_by: Uuid,
) -> Result<Option<i32>, SideEffectError> {
    if !ctx.requires_queue {
        return Ok(None);
    }

    let mut tx = pool.begin().await?;

    if lock_status(&mut tx, ctx.id).await? != Some(AppointmentStatus::Confirmed) {
        tracing::info!(appointment_id = ctx.id, "appointment no longer confirmed; no queue entry");
        return Ok(None);
    }

    if let Some(n) = live_queue_number(&mut tx, ctx.id).await? {
        return Ok(Some(n));
    }

    advisory_lock(
        &mut tx,
        &format!("queue:{}:{}", ctx.facility_id, ctx.scheduled_date.format("%Y-%m-%d")),
    )
    .await?;

    let next: i32 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(MAX(queue_number), 0) + 1
        FROM queue_entries
        WHERE facility_id = $1
          AND queue_date = $2
        "#,
    )
    .bind(ctx.facility_id)
    .bind(ctx.scheduled_date)
    .fetch_one(&mut *tx)
    .await?;

    let priority = QueuePriority::for_patient(ctx.is_senior, ctx.is_pwd);

    let inserted = sqlx::query(
        r#"
        INSERT INTO queue_entries (
          appointment_id, patient_id, facility_id, queue_date, queue_number,
          queue_type, priority_level, status, created_by_user_id
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,'waiting',$8)
        "#,
    )
    .bind(ctx.id)
    .bind(ctx.patient_id)
    .bind(ctx.facility_id)
    .bind(ctx.scheduled_date)
    .bind(next)
    .bind(QUEUE_TYPE_CONSULTATION)
    .bind(priority.as_str())
    .bind(created_by)
    .execute(&mut *tx)
    .await;

    if let Err(e) = inserted {
        let raced = e
            .as_database_error()
            .and_then(|d| d.constraint())
            .is_some_and(|c| c == LIVE_QUEUE_CONSTRAINT);
        if !raced {
            return Err(SideEffectError::Queue(e.to_string()));
        }
        // another worker created it first
        drop(tx);
        let mut conn = pool.acquire().await?;
        return Ok(live_queue_number(&mut conn, ctx.id).await?);
    }

    tx.commit().await?;

    tracing::info!(
        appointment_id = ctx.id,
        queue_number = next,
        priority = %priority,
        "queue entry created"
    );
    Ok(Some(next))
}

/* ============================================================
   Confirmation email
   ============================================================ */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailResult {
    pub sent: bool,
    pub message: String,
}

pub async fn send_confirmation(
    state: &AppState,
    ctx: &AppointmentContext,
    qr_png: Option<Vec<u8>>,
    queue_number: Option<i32>,
) -> Result<EmailResult, SideEffectError> {
    let Some(address) = ctx.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(EmailResult {
            sent: false,
            message: "Patient has no email address on file".into(),
        });
    };

    let email = mailer::confirmation_email(&ConfirmationDetails {
        patient_name: ctx.patient_name(),
        patient_email: address.to_string(),
        appointment_num: ctx
            .appointment_num
            .clone()
            .unwrap_or_else(|| format!("#{}", ctx.id)),
        facility_name: ctx.facility_name.clone(),
        service_name: ctx.service_name.clone(),
        scheduled_date: ctx.scheduled_date,
        scheduled_time: ctx.scheduled_time,
        queue_number,
        referral_num: ctx.referral_num.clone(),
        qr_png,
    });

    match state.mailer.send(email).await? {
        DeliveryOutcome::Sent => Ok(EmailResult {
            sent: true,
            message: "Confirmation email sent".into(),
        }),
        DeliveryOutcome::Disabled(msg) => Ok(EmailResult {
            sent: false,
            message: msg,
        }),
    }
}

/* ============================================================
   Outbox
   ============================================================ */

#[derive(Debug, Clone, Copy)]
enum Step {
    Qr,
    Queue,
    Email,
}

impl Step {
    fn mark_done_sql(&self) -> &'static str {
        match self {
            Step::Qr => "UPDATE appointment_events SET qr_done_at = COALESCE(qr_done_at, now()), updated_at = now() WHERE id = $1",
            Step::Queue => "UPDATE appointment_events SET queue_done_at = COALESCE(queue_done_at, now()), updated_at = now() WHERE id = $1",
            Step::Email => "UPDATE appointment_events SET email_done_at = COALESCE(email_done_at, now()), updated_at = now() WHERE id = $1",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ClaimedEvent {
    pub id: i64,
    pub appointment_id: i64,
    pub attempts: i32,
    pub qr_done: bool,
    pub queue_done: bool,
    pub email_done: bool,
}

/// Delay before the next attempt: 30s doubling per attempt, capped at 1h.
pub fn retry_delay(attempts: i32) -> Duration {
    let exp = attempts.saturating_sub(1).clamp(0, 7) as u32;
    let secs = 30_i64.saturating_mul(1 << exp);
    Duration::seconds(secs.min(3600))
}

/// Takes the lease on one pending event; `None` if someone else holds it.
pub async fn claim_event(pool: &PgPool, event_id: i64) -> Result<Option<ClaimedEvent>, sqlx::Error> {
    sqlx::query_as::<_, ClaimedEvent>(
        r#"
        UPDATE appointment_events
        SET attempts = attempts + 1,
            locked_until = now() + make_interval(secs => $2),
            updated_at = now()
        WHERE id = $1
          AND status = 'pending'
          AND (locked_until IS NULL OR locked_until < now())
        RETURNING id, appointment_id, attempts,
                  qr_done_at IS NOT NULL AS qr_done,
                  queue_done_at IS NOT NULL AS queue_done,
                  email_done_at IS NOT NULL AS email_done
        "#,
    )
    .bind(event_id)
    .bind(EVENT_LEASE_SECS)
    .fetch_optional(pool)
    .await
}

pub async fn claim_due_events(pool: &PgPool, limit: i64) -> Result<Vec<ClaimedEvent>, sqlx::Error> {
    sqlx::query_as::<_, ClaimedEvent>(
        r#"
        UPDATE appointment_events e
        SET attempts = e.attempts + 1,
            locked_until = now() + make_interval(secs => $2),
            updated_at = now()
        FROM (
          SELECT id
          FROM appointment_events
          WHERE status = 'pending'
            AND next_attempt_at <= now()
            AND (locked_until IS NULL OR locked_until < now())
          ORDER BY next_attempt_at ASC
          LIMIT $1
          FOR UPDATE SKIP LOCKED
        ) picked
        WHERE e.id = picked.id
        RETURNING e.id, e.appointment_id, e.attempts,
                  e.qr_done_at IS NOT NULL AS qr_done,
                  e.queue_done_at IS NOT NULL AS queue_done,
                  e.email_done_at IS NOT NULL AS email_done
        "#,
    )
    .bind(limit)
    .bind(EVENT_LEASE_SECS)
    .fetch_all(pool)
    .await
}

async fn mark_step(pool: &PgPool, event_id: i64, step: Step) {
    if let Err(e) = sqlx::query(step.mark_done_sql()).bind(event_id).execute(pool).await {
        tracing::warn!(event_id, ?step, error = %e, "could not record finished step");
    }
}

/// Runs whatever steps of a claimed event are still open, then records the
/// outcome (done, retry later, or failed after the last attempt).
pub async fn process_claimed(
    state: &AppState,
    event: &ClaimedEvent,
    created_by: Option<Uuid>,
) -> Result<SideEffectReport, sqlx::Error> {
    let mut report = SideEffectReport::default();

    let ctx = match load_context(&state.db, event.appointment_id).await? {
        Some(ctx) if ctx.is_confirmed() => ctx,
        _ => {
            // cancelled or gone before we got to it: nothing left to do
            finish_event(&state.db, event.id, None, event.attempts, state.outbox.max_attempts).await?;
            report.email_message = "Appointment is no longer confirmed".into();
            return Ok(report);
        }
    };

    let mut errors: Vec<String> = Vec::new();

    let qr_png = match ensure_qr_code(&state.db, &ctx).await {
        Ok(png) => {
            if !event.qr_done {
                mark_step(&state.db, event.id, Step::Qr).await;
            }
            Some(png)
        }
        Err(e) => {
            tracing::warn!(appointment_id = ctx.id, error = %e, "qr generation failed");
            errors.push(e.to_string());
            None
        }
    };
    report.qr_generated = qr_png.is_some();

    let creator = created_by.unwrap_or(state.clinic.system_user_id);
    match ensure_queue_entry(&state.db, &ctx, creator).await {
        Ok(n) => {
            report.queue_number = n;
            if !event.queue_done {
                mark_step(&state.db, event.id, Step::Queue).await;
            }
        }
        Err(e) => {
            tracing::warn!(appointment_id = ctx.id, error = %e, "queue entry creation failed");
            errors.push(e.to_string());
        }
    }

    if event.email_done {
        report.email_message = "Confirmation email already handled".into();
    } else if qr_png.is_none() && event.attempts < state.outbox.max_attempts {
        // wait for the QR code unless this is the last try
        report.email_message = "Confirmation email will be sent shortly".into();
        errors.push("email deferred until qr code is available".into());
    } else if !still_confirmed(&state.db, ctx.id).await? {
        // cancelled while the earlier steps ran
        report.email_message = "Appointment is no longer confirmed".into();
        mark_step(&state.db, event.id, Step::Email).await;
    } else {
        match send_confirmation(state, &ctx, qr_png, report.queue_number).await {
            Ok(res) => {
                report.email_sent = res.sent;
                report.email_message = res.message;
                mark_step(&state.db, event.id, Step::Email).await;
            }
            Err(e) => {
                tracing::warn!(appointment_id = ctx.id, error = %e, "confirmation email failed");
                report.email_message = "Confirmation email could not be sent".into();
                errors.push(e.to_string());
            }
        }
    }

    let last_error = (!errors.is_empty()).then(|| errors.join("; "));
    finish_event(
        &state.db,
        event.id,
        last_error.as_deref(),
        event.attempts,
        state.outbox.max_attempts,
    )
    .await?;

    Ok(report)
}

async fn finish_event(
    pool: &PgPool,
    event_id: i64,
    last_error: Option<&str>,
    attempts: i32,
    max_attempts: i32,
) -> Result<(), sqlx::Error> {
    let (status, next_at) = match last_error {
        None => ("done", Utc::now()),
        Some(_) if attempts >= max_attempts => ("failed", Utc::now()),
        Some(_) => ("pending", Utc::now() + retry_delay(attempts)),
    };

    if status == "failed" {
        tracing::error!(event_id, attempts, error = ?last_error, "side effects gave up");
    }

    sqlx::query(
        r#"
        UPDATE appointment_events
        SET status = $2,
            next_attempt_at = $3,
            last_error = $4,
            locked_until = NULL,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(event_id)
    .bind(status)
    .bind(next_at)
    .bind(last_error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Inline pass right after the booking commits.
pub async fn run_after_booking(state: &AppState, event_id: i64, created_by: Option<Uuid>) -> SideEffectReport {
    let claimed = match claim_event(&state.db, event_id).await {
        Ok(Some(ev)) => ev,
        Ok(None) => {
            return SideEffectReport {
                email_message: "Confirmation is being processed".into(),
                ..Default::default()
            };
        }
        Err(e) => {
            tracing::warn!(event_id, error = %e, "could not claim side-effect event; worker will retry");
            return SideEffectReport {
                email_message: "Confirmation will be sent shortly".into(),
                ..Default::default()
            };
        }
    };

    match process_claimed(state, &claimed, created_by).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(event_id, error = %e, "side effects interrupted; worker will retry");
            SideEffectReport {
                email_message: "Confirmation will be sent shortly".into(),
                ..Default::default()
            }
        }
    }
}

/// One polling pass of the worker; returns how many events were handled.
pub async fn run_once(state: &AppState) -> Result<usize, sqlx::Error> {
    let events = claim_due_events(&state.db, state.outbox.batch_size).await?;
    for ev in &events {
        if let Err(e) = process_claimed(state, ev, None).await {
            tracing::warn!(event_id = ev.id, error = %e, "outbox event processing failed");
        }
    }
    Ok(events.len())
}

pub fn spawn_worker(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(StdDuration::from_secs(state.outbox.poll_secs.max(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(poll_secs = state.outbox.poll_secs, "outbox worker started");

        loop {
            tick.tick().await;
            match run_once(&state).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(events = n, "outbox pass finished"),
                Err(e) => tracing::error!(error = %e, "outbox pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audit::Actor;
    use crate::booking::create_appointment;
    use crate::models::FacilityCategory;
    use crate::mutations;
    use crate::test_support::{self, RecordingMailer, booking_request, seed};

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay(1), Duration::seconds(30));
        assert_eq!(retry_delay(2), Duration::seconds(60));
        assert_eq!(retry_delay(4), Duration::seconds(240));
        assert_eq!(retry_delay(50), Duration::seconds(3600));
        assert_eq!(retry_delay(0), Duration::seconds(30));
    }

    #[test]
    fn test_report_has_queue() {
        let mut r = SideEffectReport::default();
        assert!(!r.has_queue());
        r.queue_number = Some(3);
        assert!(r.has_queue());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_queue_only_at_queueing_facility(pool: PgPool) -> sqlx::Result<()> {
        seed(&pool).await?;
        let mailer = Arc::new(RecordingMailer::default());
        let state = test_support::state(pool.clone(), mailer.clone());

        let cho = create_appointment(&pool, &state.clinic, &booking_request(8, FacilityCategory::Cho, None), &Actor::system())
            .await
            .expect("cho booking");
        let report = run_after_booking(&state, cho.event_id, None).await;
        assert_eq!(report.queue_number, Some(1));
        assert!(report.qr_generated);

        let priority: String = sqlx::query_scalar("SELECT priority_level FROM queue_entries WHERE appointment_id = $1")
            .bind(cho.appointment_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(priority, "priority");

        let bhc = create_appointment(&pool, &state.clinic, &booking_request(7, FacilityCategory::Bhc, None), &Actor::system())
            .await
            .expect("bhc booking");
        let report = run_after_booking(&state, bhc.event_id, None).await;
        assert!(!report.has_queue());
        assert!(report.email_sent);
        {
            let sent = mailer.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].to_name, "Juan Dela Cruz");
        }

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE appointment_id = $1")
            .bind(bhc.appointment_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(rows, 0);

        // re-running does not create a second ticket or resend mail
        assert!(claim_event(&pool, cho.event_id).await?.is_none());
        let ctx = load_context(&pool, cho.appointment_id).await?.expect("ctx");
        assert_eq!(ensure_queue_entry(&pool, &ctx, Uuid::from_u128(1)).await.unwrap(), Some(1));
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_qr_is_stable_once_stored(pool: PgPool) -> sqlx::Result<()> {
        seed(&pool).await?;
        let booked = create_appointment(
            &pool,
            &test_support::clinic(),
            &booking_request(7, FacilityCategory::Bhc, None),
            &Actor::system(),
        )
        .await
        .expect("booking");

        let ctx = load_context(&pool, booked.appointment_id).await?.expect("ctx");
        let first = ensure_qr_code(&pool, &ctx).await.expect("qr");
        let second = ensure_qr_code(&pool, &ctx).await.expect("qr");
        assert_eq!(first, second);
        assert_eq!(stored_qr(&pool, booked.appointment_id).await?, Some(first));
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_worker_leaves_fresh_events_to_the_request(pool: PgPool) -> sqlx::Result<()> {
        seed(&pool).await?;
        let state = test_support::state(pool.clone(), Arc::new(RecordingMailer::default()));

        let booked = create_appointment(&pool, &state.clinic, &booking_request(8, FacilityCategory::Cho, None), &Actor::system())
            .await
            .expect("booking");

        // a worker tick right after commit must not steal the event
        assert_eq!(run_once(&state).await?, 0);

        let report = run_after_booking(&state, booked.event_id, None).await;
        assert!(report.has_queue());
        assert!(report.qr_generated);

        let tickets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE appointment_id = $1")
            .bind(booked.appointment_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(tickets, 1);

        // once the delay has passed, an event the request never ran is picked up
        let other = create_appointment(&pool, &state.clinic, &booking_request(7, FacilityCategory::Cho, None), &Actor::system())
            .await
            .expect("booking");
        sqlx::query("UPDATE appointment_events SET next_attempt_at = now() WHERE id = $1")
            .bind(other.event_id)
            .execute(&pool)
            .await?;
        assert_eq!(run_once(&state).await?, 1);
        let status: String = sqlx::query_scalar("SELECT status FROM appointment_events WHERE id = $1")
            .bind(other.event_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(status, "done");
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_no_ticket_or_mail_after_cancellation(pool: PgPool) -> sqlx::Result<()> {
        seed(&pool).await?;
        let mailer = Arc::new(RecordingMailer::default());
        let state = test_support::state(pool.clone(), mailer.clone());

        let booked = create_appointment(&pool, &state.clinic, &booking_request(7, FacilityCategory::Cho, None), &Actor::system())
            .await
            .expect("booking");
        let ctx = load_context(&pool, booked.appointment_id).await?.expect("ctx");

        mutations::change_status(
            &pool,
            &state.clinic,
            booked.appointment_id,
            AppointmentStatus::Cancelled,
            Some("Schedule Conflict"),
            &Actor::system(),
            |_| Ok(()),
        )
        .await
        .expect("cancel");

        // context was read while still confirmed
        assert_eq!(ensure_queue_entry(&pool, &ctx, Uuid::from_u128(1)).await.unwrap(), None);
        let tickets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_entries WHERE appointment_id = $1")
            .bind(booked.appointment_id)
            .fetch_one(&pool)
            .await?;
        assert_eq!(tickets, 0);
        assert!(!still_confirmed(&pool, booked.appointment_id).await?);

        let report = run_after_booking(&state, booked.event_id, None).await;
        assert!(!report.email_sent);
        assert!(mailer.sent.lock().unwrap().is_empty());
        Ok(())
    }
}

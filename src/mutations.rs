//! Applies a status transition to a locked appointment row and reconciles
//! its referral and queue ticket in the same transaction.

use chrono::Utc;
use sqlx::PgPool;

use crate::audit::{self, Actor, LogEntry};
use crate::config::ClinicConfig;
use crate::error::AppointmentError;
use crate::lifecycle::{self, TransitionInput};
use crate::models::{AppointmentRow, AppointmentStatus, ReferralStatus};
use crate::scheduling;

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub old_status: AppointmentStatus,
    pub new_status: AppointmentStatus,
}

fn audit_action(status: AppointmentStatus) -> &'static str {
    match status {
        AppointmentStatus::Cancelled => "cancelled",
        AppointmentStatus::Completed => "completed",
        _ => "status_changed",
    }
}

fn referral_note(to: ReferralStatus, referral_num: &str) -> (&'static str, String) {
    match to {
        ReferralStatus::Active => (
            "referral_reactivated",
            format!("Referral {referral_num} returned to active after cancellation"),
        ),
        _ => (
            "referral_accepted",
            format!("Referral {referral_num} marked {to} on appointment completion"),
        ),
    }
}

/// `authorize` sees the locked row before anything changes.
pub async fn change_status<F>(
    pool: &PgPool,
    clinic: &ClinicConfig,
    appointment_id: i64,
    target: AppointmentStatus,
    reason: Option<&str>,
    actor: &Actor,
    authorize: F,
) -> Result<StatusChange, AppointmentError>
where
    F: FnOnce(&AppointmentRow) -> Result<(), AppointmentError>,
{
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, AppointmentRow>(
        r#"
        SELECT id, appointment_num, patient_id, facility_id, service_id, referral_id,
               scheduled_date, scheduled_time, status, cancellation_reason, created_at
        FROM appointments
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(appointment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppointmentError::NotFound)?;

    authorize(&row)?;

    let current = row
        .status()
        .map_err(|e| AppointmentError::InvalidTransition(e.to_string()))?;

    let referral: Option<(String, String)> = match row.referral_id {
        Some(rid) => {
            sqlx::query_as(
                r#"
                SELECT status, referral_num
                FROM referrals
                WHERE id = $1
                FOR UPDATE
                "#,
            )
            .bind(rid)
            .fetch_optional(&mut *tx)
            .await?
        }
        None => None,
    };
    let referral_status = referral
        .as_ref()
        .and_then(|(status, _)| status.parse::<ReferralStatus>().ok());

    let plan = lifecycle::plan_transition(TransitionInput {
        current,
        target,
        allow_pending: clinic.allow_pending_status,
        is_future: scheduling::is_in_future(
            row.scheduled_date,
            row.scheduled_time,
            clinic.offset(),
            Utc::now(),
        ),
        reason,
        referral: referral_status,
    })?;

    sqlx::query(
        r#"
        UPDATE appointments
        SET status = $2,
            cancellation_reason = COALESCE($3, cancellation_reason),
            cancelled_at = CASE WHEN $4 THEN now() ELSE cancelled_at END,
            completed_at = CASE WHEN $5 THEN now() ELSE completed_at END,
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(plan.new_status.as_str())
    .bind(plan.cancellation_reason.as_deref())
    .bind(plan.new_status == AppointmentStatus::Cancelled)
    .bind(plan.new_status == AppointmentStatus::Completed)
    .execute(&mut *tx)
    .await?;

    audit::append(
        &mut tx,
        LogEntry {
            appointment_id: row.id,
            patient_id: row.patient_id,
            action: audit_action(plan.new_status),
            old_status: Some(current),
            new_status: Some(plan.new_status),
            reason: plan.cancellation_reason.as_deref(),
        },
        actor,
    )
    .await?;

    // a missing ticket is fine
    let queue_entries_updated = match plan.queue.target_status() {
        Some(queue_status) => sqlx::query(
            r#"
            UPDATE queue_entries
            SET status = $2,
                updated_at = now()
            WHERE appointment_id = $1
              AND status IN ('waiting', 'in_progress')
            "#,
        )
        .bind(row.id)
        .bind(queue_status)
        .execute(&mut *tx)
        .await?
        .rows_affected(),
        None => 0,
    };

    if let (Some(rid), Some(to), Some((_, referral_num))) = (row.referral_id, plan.referral_to, &referral) {
        sqlx::query(
            r#"
            UPDATE referrals
            SET status = $2,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(rid)
        .bind(to.as_str())
        .execute(&mut *tx)
        .await?;

        let (action, note) = referral_note(to, referral_num);
        audit::append(
            &mut tx,
            LogEntry {
                appointment_id: row.id,
                patient_id: row.patient_id,
                action,
                old_status: None,
                new_status: None,
                reason: Some(&note),
            },
            actor,
        )
        .await?;
        tracing::info!(appointment_id = row.id, referral_id = rid, to = %to, "referral status reconciled");
    }

    tx.commit().await?;

    tracing::info!(
        appointment_id = row.id,
        from = %current,
        to = %plan.new_status,
        actor = %actor.actor_type,
        queue_entries_updated,
        "appointment status changed"
    );

    Ok(StatusChange {
        old_status: current,
        new_status: plan.new_status,
    })
}

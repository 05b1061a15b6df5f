//! Appointment status machine and the referral/queue follow-ups each move implies.

use crate::error::AppointmentError;
use crate::models::{AppointmentStatus, ReferralStatus};

/// What happens to the live queue ticket of the appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFollowUp {
    Keep,
    Cancel,
    MarkDone,
}

impl QueueFollowUp {
    pub fn target_status(&self) -> Option<&'static str> {
        match self {
            QueueFollowUp::Keep => None,
            QueueFollowUp::Cancel => Some("cancelled"),
            QueueFollowUp::MarkDone => Some("done"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransitionInput<'a> {
    pub current: AppointmentStatus,
    pub target: AppointmentStatus,
    pub allow_pending: bool,
    /// Scheduled date+time is still ahead of now (clinic local time).
    pub is_future: bool,
    pub reason: Option<&'a str>,
    pub referral: Option<ReferralStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub new_status: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    /// New status for the linked referral, when it changes.
    pub referral_to: Option<ReferralStatus>,
    pub queue: QueueFollowUp,
}

pub fn is_terminal(status: AppointmentStatus) -> bool {
    matches!(status, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
}

pub fn plan_transition(input: TransitionInput<'_>) -> Result<TransitionPlan, AppointmentError> {
    use AppointmentStatus::*;

    if is_terminal(input.current) {
        let msg = format!("Appointment is already {} and cannot be changed", input.current);
        return Err(if input.target == Cancelled {
            AppointmentError::NotCancellable(msg)
        } else {
            AppointmentError::InvalidTransition(msg)
        });
    }
    if input.current == input.target {
        return Err(AppointmentError::InvalidTransition(format!(
            "Appointment is already {}",
            input.current
        )));
    }

    match input.target {
        Cancelled => plan_cancel(input),
        Completed => {
            if input.current != Confirmed {
                return Err(AppointmentError::InvalidTransition(
                    "Only confirmed appointments can be completed".into(),
                ));
            }
            Ok(TransitionPlan {
                new_status: Completed,
                cancellation_reason: None,
                referral_to: input
                    .referral
                    .filter(|r| *r != ReferralStatus::Accepted)
                    .map(|_| ReferralStatus::Accepted),
                queue: QueueFollowUp::MarkDone,
            })
        }
        Pending => {
            if !input.allow_pending {
                return Err(AppointmentError::Validation(
                    "pending is not a supported target status".into(),
                ));
            }
            Ok(TransitionPlan {
                new_status: Pending,
                cancellation_reason: None,
                referral_to: None,
                queue: QueueFollowUp::Keep,
            })
        }
        // only reachable from pending
        Confirmed => Ok(TransitionPlan {
            new_status: Confirmed,
            cancellation_reason: None,
            referral_to: None,
            queue: QueueFollowUp::Keep,
        }),
    }
}

fn plan_cancel(input: TransitionInput<'_>) -> Result<TransitionPlan, AppointmentError> {
    if !input.is_future {
        return Err(AppointmentError::NotCancellable(
            "Past appointments cannot be cancelled".into(),
        ));
    }
    let reason = input
        .reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppointmentError::Validation("A cancellation reason is required".into()))?;

    Ok(TransitionPlan {
        new_status: AppointmentStatus::Cancelled,
        cancellation_reason: Some(reason.to_string()),
        // an accepted referral becomes usable again; anything else stays put
        referral_to: (input.referral == Some(ReferralStatus::Accepted))
            .then_some(ReferralStatus::Active),
        queue: QueueFollowUp::Cancel,
    })
}

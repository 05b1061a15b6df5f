use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::config::{ClinicConfig, OutboxConfig};
use crate::mailer::Mailer;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub clinic: ClinicConfig,
    pub outbox: OutboxConfig,
    pub mailer: Arc<dyn Mailer>,
}

/* -------------------------
   Domain enums (stored as TEXT)
--------------------------*/

/// Raised when a TEXT column or request field holds an unknown enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    /// Accepted by the generic updater for legacy rows; nothing creates it.
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

text_enum!(AppointmentStatus, "appointment status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Completed => "completed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferralStatus {
    Active,
    Accepted,
    Cancelled,
    Expired,
}

text_enum!(ReferralStatus, "referral status", {
    Active => "active",
    Accepted => "accepted",
    Cancelled => "cancelled",
    Expired => "expired",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    Normal,
    Priority,
}

text_enum!(QueuePriority, "queue priority", {
    Normal => "normal",
    Priority => "priority",
});

impl QueuePriority {
    /// Seniors and PWDs go to the priority lane.
    pub fn for_patient(is_senior: bool, is_pwd: bool) -> Self {
        if is_senior || is_pwd {
            QueuePriority::Priority
        } else {
            QueuePriority::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Patient,
    Staff,
    System,
}

text_enum!(ActorType, "actor type", {
    Patient => "patient",
    Staff => "staff",
    System => "system",
});

/// Facility category a patient asks for when booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacilityCategory {
    Bhc,
    Dho,
    Cho,
}

text_enum!(FacilityCategory, "facility type", {
    Bhc => "bhc",
    Dho => "dho",
    Cho => "cho",
});

impl FacilityCategory {
    /// Value of `facilities.facility_type` for this category.
    pub fn facility_type(&self) -> &'static str {
        match self {
            FacilityCategory::Bhc => "Barangay Health Center",
            FacilityCategory::Dho => "District Health Office",
            FacilityCategory::Cho => "City Health Office",
        }
    }
}

/// Stable identifiers of the offered services (catalog version 1).
///
/// Requests may name either the code (`primary_care`) or the display name
/// the booking form has always sent (`Primary Care`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCode {
    PrimaryCare,
    Dental,
    MaternalCare,
    FamilyPlanning,
    Immunization,
    TbDots,
    AnimalBite,
    Laboratory,
}

pub const SERVICE_CATALOG_VERSION: i32 = 1;

impl ServiceCode {
    pub const ALL: [ServiceCode; 8] = [
        ServiceCode::PrimaryCare,
        ServiceCode::Dental,
        ServiceCode::MaternalCare,
        ServiceCode::FamilyPlanning,
        ServiceCode::Immunization,
        ServiceCode::TbDots,
        ServiceCode::AnimalBite,
        ServiceCode::Laboratory,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ServiceCode::PrimaryCare => "primary_care",
            ServiceCode::Dental => "dental",
            ServiceCode::MaternalCare => "maternal_care",
            ServiceCode::FamilyPlanning => "family_planning",
            ServiceCode::Immunization => "immunization",
            ServiceCode::TbDots => "tb_dots",
            ServiceCode::AnimalBite => "animal_bite",
            ServiceCode::Laboratory => "laboratory",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceCode::PrimaryCare => "Primary Care",
            ServiceCode::Dental => "Dental Services",
            ServiceCode::MaternalCare => "Maternal Care",
            ServiceCode::FamilyPlanning => "Family Planning",
            ServiceCode::Immunization => "Immunization",
            ServiceCode::TbDots => "TB DOTS",
            ServiceCode::AnimalBite => "Animal Bite Treatment",
            ServiceCode::Laboratory => "Laboratory Test",
        }
    }
}

impl FromStr for ServiceCode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ServiceCode::ALL
            .into_iter()
            .find(|c| c.code() == wanted || c.display_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownVariant {
                kind: "service",
                value: wanted.to_string(),
            })
    }
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, Clone, FromRow)]
pub struct AppointmentRow {
    pub id: i64,
    pub appointment_num: Option<String>,
    pub patient_id: i64,
    pub facility_id: i64,
    pub service_id: i64,
    pub referral_id: Option<i64>,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub status: String,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AppointmentRow {
    pub fn status(&self) -> Result<AppointmentStatus, UnknownVariant> {
        self.status.parse()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct FacilityRow {
    pub id: i64,
    pub name: String,
    pub facility_type: String,
    pub requires_queue: bool,
}

/// The parts of a patient record booking needs.
#[derive(Debug, Clone, FromRow)]
pub struct PatientRow {
    pub id: i64,
    pub barangay_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReferralRow {
    pub id: i64,
    pub referral_num: String,
    pub patient_id: i64,
    pub destination_facility_id: Option<i64>,
    pub external_facility_name: Option<String>,
    pub referral_reason: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceRow {
    pub id: i64,
    pub service_code: String,
    pub name: String,
    pub catalog_version: i32,
    pub is_active: bool,
}

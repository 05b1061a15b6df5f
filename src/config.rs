use std::env;

use chrono::FixedOffset;
use uuid::Uuid;

/// Seeded by migrations/002_people.sql.
const DEFAULT_SYSTEM_USER_ID: Uuid = Uuid::from_u128(1);

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub db_max_connections: u32,
    pub run_migrations: bool,
    pub clinic: ClinicConfig,
    pub smtp: SmtpConfig,
    pub outbox: OutboxConfig,
}

/// Business knobs for booking and status handling.
#[derive(Clone, Debug)]
pub struct ClinicConfig {
    /// Koronadal runs on Philippine time (UTC+8).
    pub utc_offset_hours: i32,
    pub slot_capacity: i64,
    pub allow_pending_status: bool,
    pub system_user_id: Uuid,
}

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub poll_secs: u64,
    pub max_attempts: i32,
    pub batch_size: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let system_user_id = match env::var("SYSTEM_USER_ID") {
            Ok(raw) => raw.trim().parse::<Uuid>()?,
            Err(_) => DEFAULT_SYSTEM_USER_ID,
        };

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 10),
            run_migrations: parse_bool_or("RUN_MIGRATIONS", true),
            clinic: ClinicConfig {
                utc_offset_hours: parse_or("CLINIC_UTC_OFFSET_HOURS", 8),
                slot_capacity: parse_or("SLOT_CAPACITY", 20),
                allow_pending_status: parse_bool_or("ALLOW_PENDING_STATUS", false),
                system_user_id,
            },
            smtp: SmtpConfig {
                host: env::var("SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                port: parse_or("SMTP_PORT", 587),
                username: env::var("SMTP_USERNAME").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                from: env::var("SMTP_FROM").unwrap_or_else(|_| {
                    "CHO Koronadal <noreply@chokoronadal.gov.ph>".to_string()
                }),
            },
            outbox: OutboxConfig {
                poll_secs: parse_or("OUTBOX_POLL_SECS", 15),
                max_attempts: parse_or("OUTBOX_MAX_ATTEMPTS", 5),
                batch_size: parse_or("OUTBOX_BATCH_SIZE", 20),
            },
        })
    }
}

impl ClinicConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(8 * 3600).expect("UTC+8 is a valid offset"))
    }
}

impl SmtpConfig {
    /// An empty password or the literal "disabled" keeps mail in log-only mode.
    pub fn is_disabled(&self) -> bool {
        let pw = self.password.trim();
        pw.is_empty() || pw.eq_ignore_ascii_case("disabled")
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_bool_or(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp(password: &str) -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port: 25,
            username: "mailer".into(),
            password: password.into(),
            from: "CHO <noreply@example.org>".into(),
        }
    }

    #[test]
    fn test_smtp_disabled_detection() {
        assert!(smtp("").is_disabled());
        assert!(smtp("   ").is_disabled());
        assert!(smtp("disabled").is_disabled());
        assert!(smtp("DISABLED").is_disabled());
        assert!(!smtp("app-password").is_disabled());
    }

    #[test]
    fn test_clinic_offset_falls_back_on_out_of_range() {
        let mut clinic = ClinicConfig {
            utc_offset_hours: 8,
            slot_capacity: 20,
            allow_pending_status: false,
            system_user_id: DEFAULT_SYSTEM_USER_ID,
        };
        assert_eq!(clinic.offset().local_minus_utc(), 8 * 3600);

        clinic.utc_offset_hours = 99;
        assert_eq!(clinic.offset().local_minus_utc(), 8 * 3600);
    }
}

use sqlx::PgConnection;
use uuid::Uuid;

use crate::middleware::client_meta::ClientMeta;
use crate::models::{ActorType, AppointmentStatus};

/// Who is acting, as recorded on `appointment_logs`.
#[derive(Debug, Clone)]
pub struct Actor {
    pub actor_type: ActorType,
    pub user_id: Option<Uuid>,
    pub client: ClientMeta,
}

impl Actor {
    #[cfg(test)]
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            user_id: None,
            client: ClientMeta::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry<'a> {
    pub appointment_id: i64,
    pub patient_id: i64,
    pub action: &'a str,
    pub old_status: Option<AppointmentStatus>,
    pub new_status: Option<AppointmentStatus>,
    pub reason: Option<&'a str>,
}

/// Appends one audit row. Client address and agent are kept only for
/// patient-initiated actions.
pub async fn append(conn: &mut PgConnection, entry: LogEntry<'_>, actor: &Actor) -> Result<(), sqlx::Error> {
    let (ip, ua) = match actor.actor_type {
        ActorType::Patient => (actor.client.ip_address.as_deref(), actor.client.user_agent.as_deref()),
        _ => (None, None),
    };

    sqlx::query(
        r#"
        INSERT INTO appointment_logs (
          appointment_id, patient_id, action, old_status, new_status,
          reason, actor_type, actor_user_id, ip_address, user_agent
        )
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
        "#,
    )
    .bind(entry.appointment_id)
    .bind(entry.patient_id)
    .bind(entry.action)
    .bind(entry.old_status.map(|s| s.as_str()))
    .bind(entry.new_status.map(|s| s.as_str()))
    .bind(entry.reason)
    .bind(actor.actor_type.as_str())
    .bind(actor.user_id)
    .bind(ip)
    .bind(ua)
    .execute(conn)
    .await?;

    Ok(())
}

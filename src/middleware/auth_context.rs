use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{ActorType, AppState};

/*
Roles (app_users.role):
0 patient
1 admin
2 doctor
3 nurse
4 barangay health worker
5 records officer
*/
pub const ROLE_PATIENT: i16 = 0;

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: i16,
    pub session_token_id: Uuid,
    /// Set when the user is linked to a patient record.
    pub patient_id: Option<i64>,
}

impl AuthContext {
    pub fn is_patient(&self) -> bool {
        self.role == ROLE_PATIENT
    }

    pub fn is_staff(&self) -> bool {
        (1..=5).contains(&self.role)
    }

    pub fn actor_type(&self) -> ActorType {
        if self.is_patient() {
            ActorType::Patient
        } else {
            ActorType::Staff
        }
    }

    /// Patients act on their own record; staff name the patient explicitly.
    pub fn resolve_patient(&self, requested: Option<i64>) -> Result<i64, ApiError> {
        if self.is_patient() {
            let own = self.patient_id.ok_or_else(|| {
                ApiError::Forbidden("NO_PATIENT_PROFILE", "Account has no patient record".into())
            })?;
            if requested.is_some_and(|p| p != own) {
                return Err(ApiError::Forbidden(
                    "FORBIDDEN",
                    "Patients can only act on their own record".into(),
                ));
            }
            return Ok(own);
        }
        requested.ok_or_else(|| ApiError::validation("patient_id is required"))
    }

    pub fn ensure_staff(&self) -> Result<(), ApiError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Only health office staff can perform this action".into(),
            ))
        }
    }

    /// Staff may touch any patient's appointment, patients only their own.
    pub fn ensure_can_access_patient(&self, patient_id: i64) -> Result<(), ApiError> {
        if self.is_staff() || self.patient_id == Some(patient_id) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                "You do not have access to this appointment".into(),
            ))
        }
    }
}

/// Hash token for DB lookup (SHA-256 hex).
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    role: i16,
    patient_id: Option<i64>,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            // Valid, unrevoked session of an active user, plus their patient link
            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.user_id, u.role, p.id AS patient_id
                FROM session_token st
                JOIN app_users u ON u.user_id = st.user_id
                LEFT JOIN patients p ON p.user_id = u.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND u.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
            .ok_or_else(ApiError::session_expired)?;

            // Touch last_seen_at (best-effort)
            let _ = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await;

            Ok(AuthContext {
                user_id: row.user_id,
                role: row.role,
                session_token_id: row.session_token_id,
                patient_id: row.patient_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: i16, patient_id: Option<i64>) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            session_token_id: Uuid::new_v4(),
            patient_id,
        }
    }

    #[test]
    fn test_hash_access_token_is_sha256_hex() {
        assert_eq!(
            hash_access_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_patient_resolves_own_record_only() {
        let patient = ctx(ROLE_PATIENT, Some(7));
        assert_eq!(patient.resolve_patient(None).unwrap(), 7);
        assert_eq!(patient.resolve_patient(Some(7)).unwrap(), 7);
        assert!(matches!(patient.resolve_patient(Some(8)), Err(ApiError::Forbidden(..))));

        let orphan = ctx(ROLE_PATIENT, None);
        assert!(orphan.resolve_patient(None).is_err());
    }

    #[test]
    fn test_staff_must_name_patient() {
        let nurse = ctx(3, None);
        assert_eq!(nurse.resolve_patient(Some(11)).unwrap(), 11);
        assert!(matches!(nurse.resolve_patient(None), Err(ApiError::BadRequest(..))));
        assert_eq!(nurse.actor_type(), ActorType::Staff);
    }

    #[test]
    fn test_access_rules() {
        let patient = ctx(ROLE_PATIENT, Some(7));
        assert!(patient.ensure_can_access_patient(7).is_ok());
        assert!(patient.ensure_can_access_patient(8).is_err());
        assert!(patient.ensure_staff().is_err());

        let admin = ctx(1, None);
        assert!(admin.ensure_can_access_patient(8).is_ok());
        assert!(admin.ensure_staff().is_ok());
    }
}

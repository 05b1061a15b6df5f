use axum::extract::{Form, FromRequest, Request};
use axum::http::header;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::ApiError;

/// Body accepted as JSON or as a classic urlencoded form post.
#[derive(Debug)]
pub struct JsonOrForm<T>(pub T);

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request(
        req: Request,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let is_form = req
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

            if is_form {
                let Form(value) = Form::<T>::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::validation(format!("invalid form body: {}", e.body_text())))?;
                Ok(JsonOrForm(value))
            } else {
                let Json(value) = Json::<T>::from_request(req, state)
                    .await
                    .map_err(|e| ApiError::validation(format!("invalid JSON body: {}", e.body_text())))?;
                Ok(JsonOrForm(value))
            }
        }
    }
}

/// Optional id that may arrive as a number, a numeric string, an empty
/// string (blank form field) or null.
pub fn optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("null") {
                Ok(None)
            } else {
                s.parse::<i64>()
                    .map(Some)
                    .map_err(|_| serde::de::Error::custom(format!("expected an id, got {s:?}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[derive(Debug, Deserialize)]
    struct Probe {
        service: String,
        #[serde(default, deserialize_with = "optional_id")]
        referral_id: Option<i64>,
    }

    async fn extract(content_type: &str, body: &str) -> Result<Probe, ApiError> {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap();
        JsonOrForm::<Probe>::from_request(req, &()).await.map(|JsonOrForm(p)| p)
    }

    #[tokio::test]
    async fn test_json_body() {
        let p = extract("application/json", r#"{"service":"Primary Care","referral_id":5}"#)
            .await
            .unwrap();
        assert_eq!(p.service, "Primary Care");
        assert_eq!(p.referral_id, Some(5));
    }

    #[tokio::test]
    async fn test_form_body_with_blank_referral() {
        let p = extract(
            "application/x-www-form-urlencoded",
            "service=Primary+Care&referral_id=",
        )
        .await
        .unwrap();
        assert_eq!(p.service, "Primary Care");
        assert_eq!(p.referral_id, None);
    }

    #[tokio::test]
    async fn test_form_body_with_referral() {
        let p = extract("application/x-www-form-urlencoded", "service=dental&referral_id=12")
            .await
            .unwrap();
        assert_eq!(p.referral_id, Some(12));
    }

    #[tokio::test]
    async fn test_bad_body_is_validation_error() {
        let err = extract("application/json", "{not json").await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest("VALIDATION_ERROR", _)));

        let err = extract("application/json", r#"{"service":"x","referral_id":"abc"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest("VALIDATION_ERROR", _)));
    }
}

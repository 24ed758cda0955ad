use crate::database;
use crate::types::AppState;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Every handler error is a status plus `{"error": "..."}`.
pub type ApiError = (StatusCode, Json<ErrorBody>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

impl AppState {
    /// Maps an internal failure to a 500. The cause is only echoed back in
    /// development; it is always logged.
    pub fn internal_err(&self) -> impl Fn(anyhow::Error) -> ApiError + use<> {
        let expose = self.config.is_development();
        move |e| {
            error!(error = ?e, "internal error");
            let message = if expose {
                format!("{:#}", e)
            } else {
                "internal server error".to_string()
            };
            api_error(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }

    /// Like [`AppState::internal_err`], but UNIQUE violations become 409 with `conflict`.
    pub fn conflict_or_internal(
        &self,
        conflict: &'static str,
    ) -> impl Fn(anyhow::Error) -> ApiError + use<> {
        let internal = self.internal_err();
        move |e| {
            if database::is_unique_violation(&e) {
                api_error(StatusCode::CONFLICT, conflict)
            } else {
                internal(e)
            }
        }
    }
}

/// Unwraps a JSON body, turning any rejection into a 400.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| api_error(StatusCode::BAD_REQUEST, rejection.body_text()))
}

/// For endpoints whose body is optional: a request without a JSON body
/// yields the default value.
pub fn optional_json_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(api_error(StatusCode::BAD_REQUEST, rejection.body_text())),
    }
}

pub fn not_found(what: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("{} not found", what))
}

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid uuid regex")
});

/// Canonical hyphenated form only.
pub fn is_uuid(s: &str) -> bool {
    UUID_RE.is_match(s)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

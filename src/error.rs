//! # Error Handling
//!
//! Problem+json API errors carrying a trace id, and the domain error enums
//! raised by the session, queue, model-provider and broadcast layers.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::telemetry;

/// Error body returned by every gateway endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Machine-readable code, e.g. `SESSION_NOT_FOUND`
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation id shared with the request's log lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(String::into_boxed_str)
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Whether a database error is a unique-constraint violation on Postgres or SQLite.
pub fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::{DbErr, RuntimeErr};

    const PG_UNIQUE: &str = "23505";
    const SQLITE_UNIQUE: &[&str] = &["1555", "2067"];

    let (DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
    | DbErr::Exec(RuntimeErr::SqlxError(sqlx_err))) = error
    else {
        return false;
    };
    let Some(db_error) = sqlx_err.as_database_error() else {
        return false;
    };

    db_error.is_unique_violation()
        || db_error
            .code()
            .is_some_and(|code| code == PG_UNIQUE || SQLITE_UNIQUE.contains(&code.as_ref()))
}

/// Failures of the per-tenant network session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for tenant")]
    NotFound,
    #[error("session is not connected")]
    NotConnected,
    #[error("session requires pairing")]
    PairingRequired,
    #[error("network error: {0}")]
    Network(String),
    #[error("session storage error: {0}")]
    Storage(String),
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),
}

/// Failures of the durable work queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
    #[error("queue payload could not be encoded or decoded: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Failures raised by a language-model provider call.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("no credential resolvable for provider {provider}")]
    MissingCredential { provider: String },
    #[error("unsupported provider {0}")]
    Unsupported(String),
    #[error("provider {provider} rejected the credential")]
    Auth { provider: String },
    #[error("provider {provider} quota exhausted")]
    Quota { provider: String },
    #[error("provider {provider} timed out")]
    Timeout { provider: String },
    #[error("provider {provider} returned status {status}: {body}")]
    Upstream {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("provider {provider} returned a malformed response: {detail}")]
    Malformed { provider: String, detail: String },
    #[error("provider transport error: {0}")]
    Transport(String),
}

/// Invalid broadcast recurrence rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("unknown recurrence type '{0}'")]
    UnknownType(String),
    #[error("recurrence time '{0}' is not HH:MM")]
    InvalidTime(String),
    #[error("unknown weekday '{0}'")]
    InvalidWeekday(String),
    #[error("weekly recurrence requires at least one weekday")]
    NoWeekdays,
    #[error("recurrence interval must be positive, got {0}")]
    InvalidInterval(i32),
    #[error("recurring campaign is missing its recurrence type")]
    MissingType,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/problem+json"),
            )],
            axum::Json(self),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                &format!("Record not found: {}", record),
            ),
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::NotFound => Self::new(
                StatusCode::NOT_FOUND,
                "SESSION_NOT_FOUND",
                "No session exists for this tenant",
            ),
            SessionError::NotConnected => Self::new(
                StatusCode::CONFLICT,
                "SESSION_NOT_CONNECTED",
                "Session is not connected",
            ),
            SessionError::PairingRequired => Self::new(
                StatusCode::CONFLICT,
                "PAIRING_REQUIRED",
                "Session must be paired before use",
            ),
            SessionError::UnsupportedMedia(kind) => Self::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                &format!("Unsupported media type: {}", kind),
            ),
            SessionError::Network(detail) => {
                tracing::warn!(detail = %detail, "Session network failure");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "NETWORK_ERROR",
                    "Messaging network request failed",
                )
                .with_details(json!({ "detail": truncate_detail(&detail) }))
            }
            SessionError::Storage(detail) => {
                tracing::error!(detail = %detail, "Session storage failure");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Session storage error",
                )
            }
        }
    }
}

fn truncate_detail(detail: &str) -> String {
    if detail.chars().count() > 200 {
        let truncated: String = detail.chars().take(200).collect();
        format!("{}...", truncated)
    } else {
        detail.to_string()
    }
}

/// 401 with an optional custom message.
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// 401 pinned to the trace id of the rejected request.
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let mut error = unauthorized(message);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// 400 with per-field details.
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn problem_json_content_type_and_status() {
        let response = ApiError::new(StatusCode::CONFLICT, "CONFLICT", "exists").into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn fallback_trace_id_is_a_short_correlation_id() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "bad");
        let trace_id = error.trace_id.expect("trace id");
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn anyhow_errors_hide_their_cause() {
        let api_error: ApiError = anyhow::anyhow!("secret detail").into();
        assert_eq!(api_error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api_error.message, Box::from("An internal error occurred"));
    }

    #[test]
    fn record_not_found_maps_to_404() {
        let api_error: ApiError = sea_orm::DbErr::RecordNotFound("broadcast".to_string()).into();
        assert_eq!(api_error.status, StatusCode::NOT_FOUND);
        assert!(api_error.message.contains("broadcast"));
    }

    #[test]
    fn unauthorized_keeps_the_given_trace_id() {
        let error = unauthorized_with_trace_id(Some("Invalid bearer token"), "t-1".to_string());
        assert_eq!(error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(error.message, Box::from("Invalid bearer token"));
        assert_eq!(error.trace_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn validation_error_carries_field_details() {
        let error = validation_error("Invalid recipient", json!({ "to": "required" }));
        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.details, Some(Box::new(json!({ "to": "required" }))));
    }

    #[test]
    fn session_errors_map_to_statuses() {
        let not_found: ApiError = SessionError::NotFound.into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.code, Box::from("SESSION_NOT_FOUND"));

        let not_connected: ApiError = SessionError::NotConnected.into();
        assert_eq!(not_connected.status, StatusCode::CONFLICT);

        let pairing: ApiError = SessionError::PairingRequired.into();
        assert_eq!(pairing.code, Box::from("PAIRING_REQUIRED"));

        let network: ApiError = SessionError::Network("x".repeat(500)).into();
        assert_eq!(network.status, StatusCode::BAD_GATEWAY);
        let details = network.details.expect("network details");
        let detail = details["detail"].as_str().unwrap();
        assert!(detail.ends_with("..."));
        assert_eq!(detail.chars().count(), 203);
    }

    #[test]
    fn non_sqlx_errors_are_not_unique_violations() {
        assert!(!is_unique_violation(&sea_orm::DbErr::Custom(
            "duplicate".to_string()
        )));
    }
}

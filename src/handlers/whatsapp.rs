//! # Session Management Handlers
//!
//! Operator endpoints to link, inspect and unlink a tenant's network
//! session, send messages on its behalf and clear a conversation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::{OperatorAuth, TenantExtension, TenantHeader};
use crate::error::{ApiError, validation_error};
use crate::jid;
use crate::server::AppState;
use crate::session::{ConnectOutcome, MediaKind, OutboundMedia, SessionStatus, StatusSource};

/// Longest text accepted by the send endpoint, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectResponse {
    /// `connected`, `already_connected` or `pairing_required`
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jid: Option<String>,
    /// Code to enter on the phone when pairing is required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    /// Recipient chat identifier, e.g. `6281234567890@s.whatsapp.net`
    pub recipient_jid: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMediaRequest {
    pub recipient_jid: String,
    /// `image` or `document`; inferred from the file name when absent
    #[serde(default)]
    pub media_type: Option<String>,
    pub file_name: String,
    #[serde(default)]
    pub caption: String,
    /// Base64 encoded file contents
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendResponse {
    pub success: bool,
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClearChatResponse {
    pub success: bool,
    pub deleted_count: u64,
}

/// Link the tenant's session to the network
#[utoipa::path(
    post,
    path = "/api/whatsapp/connect",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Session connected or pairing started", body = ConnectResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 502, description = "Network unreachable", body = ApiError)
    ),
    tag = "whatsapp"
)]
pub async fn connect(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<ConnectResponse>, ApiError> {
    let current = state.sessions.status(tenant.0).await?;
    if current.connected && current.source == StatusSource::Live {
        return Ok(Json(ConnectResponse {
            status: "already_connected".to_string(),
            message: match &current.jid {
                Some(jid) => format!("Already connected as {}", jid),
                None => "Already connected".to_string(),
            },
            jid: current.jid,
            pairing_code: None,
        }));
    }

    let response = match state.sessions.connect(tenant.0).await? {
        ConnectOutcome::Connected { jid } => ConnectResponse {
            status: "connected".to_string(),
            message: "Successfully connected".to_string(),
            jid,
            pairing_code: None,
        },
        ConnectOutcome::PairingRequired { code } => ConnectResponse {
            status: "pairing_required".to_string(),
            message: "Enter the pairing code on the phone to link this device".to_string(),
            jid: None,
            pairing_code: Some(code),
        },
    };
    Ok(Json(response))
}

/// Unlink and drop the tenant's session
#[utoipa::path(
    delete,
    path = "/api/whatsapp/disconnect",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Session disconnected"),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "whatsapp"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.disconnect(tenant.0).await?;
    Ok(Json(json!({
        "status": "disconnected",
        "message": "Successfully disconnected",
    })))
}

/// Current session status, live or last recorded
#[utoipa::path(
    get,
    path = "/api/whatsapp/status",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Session status", body = SessionStatus),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "whatsapp"
)]
pub async fn status(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
) -> Result<Json<SessionStatus>, ApiError> {
    Ok(Json(state.sessions.status(tenant.0).await?))
}

/// Send a text message from the tenant's account
#[utoipa::path(
    post,
    path = "/api/whatsapp/send",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Message sent", body = SendResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "No session", body = ApiError),
        (status = 409, description = "Session not connected", body = ApiError)
    ),
    tag = "whatsapp"
)]
pub async fn send_message(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let recipient = require_recipient(&request.recipient_jid)?;
    if request.message.trim().is_empty() {
        return Err(validation_error(
            "Message is required",
            json!({ "message": "must not be empty" }),
        ));
    }
    if request.message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(validation_error(
            "Message too long",
            json!({ "message": format!("at most {} characters", MAX_MESSAGE_CHARS) }),
        ));
    }

    let sent = state
        .sessions
        .send_text(tenant.0, &recipient, &request.message)
        .await?;
    Ok(Json(SendResponse {
        success: true,
        message_id: sent.message_id,
        status: "sent".to_string(),
    }))
}

/// Send an image or document from the tenant's account
#[utoipa::path(
    post,
    path = "/api/whatsapp/send-media",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = SendMediaRequest,
    responses(
        (status = 200, description = "Media sent", body = SendResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 409, description = "Session not connected", body = ApiError)
    ),
    tag = "whatsapp"
)]
pub async fn send_media(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Json(request): Json<SendMediaRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let recipient = require_recipient(&request.recipient_jid)?;
    let file_name = request.file_name.trim();
    if file_name.is_empty() {
        return Err(validation_error(
            "File name is required",
            json!({ "file_name": "must not be empty" }),
        ));
    }
    let bytes = STANDARD.decode(request.data.trim()).map_err(|_| {
        validation_error("Invalid file data", json!({ "data": "must be base64" }))
    })?;
    if bytes.is_empty() {
        return Err(validation_error(
            "File is required",
            json!({ "data": "must not be empty" }),
        ));
    }
    let kind = match request.media_type.as_deref() {
        Some(raw) if !raw.trim().is_empty() => MediaKind::parse(raw)?,
        _ => infer_kind(file_name),
    };

    let sent = state
        .sessions
        .send_media(
            tenant.0,
            &recipient,
            OutboundMedia {
                kind,
                bytes,
                file_name: file_name.to_string(),
                caption: request.caption,
            },
        )
        .await?;
    Ok(Json(SendResponse {
        success: true,
        message_id: sent.message_id,
        status: "sent".to_string(),
    }))
}

/// Delete every stored message of one conversation
#[utoipa::path(
    delete,
    path = "/api/whatsapp/messages/{jid}",
    security(("bearer_auth" = [])),
    params(
        TenantHeader,
        ("jid" = String, Path, description = "Chat identifier of the conversation")
    ),
    responses(
        (status = 200, description = "Conversation cleared", body = ClearChatResponse),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "whatsapp"
)]
pub async fn clear_messages(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(raw_jid): Path<String>,
) -> Result<(StatusCode, Json<ClearChatResponse>), ApiError> {
    let chat = require_recipient(&raw_jid)?;
    let deleted_count = state.sessions.clear_chat(tenant.0, &chat).await?;
    Ok((
        StatusCode::OK,
        Json(ClearChatResponse {
            success: true,
            deleted_count,
        }),
    ))
}

fn require_recipient(raw: &str) -> Result<String, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return Err(validation_error(
            "Recipient JID is required",
            json!({ "recipient_jid": "must be a chat identifier such as 62811@s.whatsapp.net" }),
        ));
    }
    Ok(jid::normalize(trimmed))
}

/// Images by extension, everything else as a document.
fn infer_kind(file_name: &str) -> MediaKind {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" | "png" => MediaKind::Image,
        _ => MediaKind::Document,
    }
}

//! # Bridge Event Ingress
//!
//! The protocol bridge posts network events here; signatures are checked by
//! [`crate::webhook_verification::webhook_verification_middleware`] before
//! the body reaches this handler.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::json;

use crate::auth::parse_tenant_id;
use crate::error::ApiError;
use crate::server::AppState;
use crate::session::NetworkEvent;

/// Accept one network event for a tenant's live session
#[utoipa::path(
    post,
    path = "/api/bridge/{tenant_id}/events",
    params(
        ("tenant_id" = String, Path, description = "Tenant owning the session"),
        ("X-Bridge-Signature" = String, Header, description = "sha256=<hex> HMAC of the body")
    ),
    responses(
        (status = 202, description = "Event queued for the session"),
        (status = 401, description = "Signature rejected"),
        (status = 404, description = "No live session for the tenant", body = ApiError)
    ),
    tag = "bridge"
)]
pub async fn receive_event(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(event): Json<NetworkEvent>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let tenant = parse_tenant_id(&tenant_id)?;
    let kind = event.name();
    state.sessions.deliver(tenant.0, event)?;
    tracing::debug!(tenant_id = %tenant.0, event = kind, "Bridge event accepted");
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": kind }))))
}

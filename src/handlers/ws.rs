//! # Dashboard WebSocket
//!
//! `GET /api/ws?tenant_id=..&token=..` upgrades to a WebSocket that streams
//! the tenant's hub frames. Inbound client messages are ignored apart from
//! close frames.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, warn};
use utoipa::IntoParams;

use crate::auth::{authorize_token, parse_tenant_id};
use crate::error::ApiError;
use crate::hub::Subscription;
use crate::server::AppState;

#[derive(Debug, Deserialize, IntoParams)]
pub struct WsQuery {
    /// Tenant whose events are streamed
    pub tenant_id: String,
    /// Operator token
    pub token: String,
}

/// Subscribe to a tenant's real-time events
#[utoipa::path(
    get,
    path = "/api/ws",
    params(WsQuery),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 400, description = "Invalid tenant id", body = ApiError),
        (status = 401, description = "Invalid token", body = ApiError)
    ),
    tag = "events"
)]
pub async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    authorize_token(&state.config, &query.token)?;
    let tenant = parse_tenant_id(&query.tenant_id)?;
    let subscription = state.hub.subscribe(tenant.0).await.map_err(anyhow::Error::from)?;
    Ok(upgrade.on_upgrade(move |socket| stream_events(socket, subscription)))
}

async fn stream_events(socket: WebSocket, mut subscription: Subscription) {
    let tenant_id = subscription.tenant_id();
    debug!(tenant_id = %tenant_id, "Dashboard connected");
    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    // Dropped by the hub as a slow consumer.
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                if let Err(err) = sink.send(Message::Text(frame.as_ref().into())).await {
                    debug!(tenant_id = %tenant_id, error = %err, "Dashboard send failed");
                    break;
                }
            }
            message = inbound.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(tenant_id = %tenant_id, error = %err, "Dashboard socket error");
                        break;
                    }
                }
            }
        }
    }
    debug!(tenant_id = %tenant_id, "Dashboard disconnected");
}

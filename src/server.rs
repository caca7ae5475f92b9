//! # Server Configuration
//!
//! Router assembly for the gateway's HTTP surface and the OpenAPI document.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::handlers;
use crate::hub::EventHub;
use crate::session::ConnectionManager;
use crate::telemetry::trace_context_middleware;
use crate::webhook_verification::webhook_verification_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub sessions: ConnectionManager,
    pub hub: EventHub,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let operator = Router::new()
        .route("/api/whatsapp/connect", post(handlers::whatsapp::connect))
        .route(
            "/api/whatsapp/disconnect",
            delete(handlers::whatsapp::disconnect),
        )
        .route("/api/whatsapp/status", get(handlers::whatsapp::status))
        .route("/api/whatsapp/send", post(handlers::whatsapp::send_message))
        .route(
            "/api/whatsapp/send-media",
            post(handlers::whatsapp::send_media),
        )
        .route(
            "/api/whatsapp/messages/{jid}",
            delete(handlers::whatsapp::clear_messages),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&config),
            auth_middleware,
        ));

    let bridge = Router::new()
        .route(
            "/api/bridge/{tenant_id}/events",
            post(handlers::bridge::receive_event),
        )
        .layer(middleware::from_fn_with_state(
            config,
            webhook_verification_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/ws", get(handlers::ws::subscribe))
        .merge(operator)
        .merge(bridge)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serve `state` on the configured address until `shutdown` fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, profile = %profile, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::whatsapp::connect,
        crate::handlers::whatsapp::disconnect,
        crate::handlers::whatsapp::status,
        crate::handlers::whatsapp::send_message,
        crate::handlers::whatsapp::send_media,
        crate::handlers::whatsapp::clear_messages,
        crate::handlers::bridge::receive_event,
        crate::handlers::ws::subscribe,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::handlers::HealthResponse,
            crate::handlers::whatsapp::ConnectResponse,
            crate::handlers::whatsapp::SendMessageRequest,
            crate::handlers::whatsapp::SendMediaRequest,
            crate::handlers::whatsapp::SendResponse,
            crate::handlers::whatsapp::ClearChatResponse,
            crate::session::SessionStatus,
            crate::session::StatusSource,
        )
    ),
    modifiers(&BearerAuth),
    info(
        title = "Tenant Gateway API",
        description = "Multi-tenant messaging gateway: sessions, sends and real-time events",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

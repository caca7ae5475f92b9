//! # Tests for Handlers
//!
//! Router-level tests against an in-memory database and a session factory
//! that never reaches the network.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use migration::{Migrator, MigratorTrait};
use sea_orm::Database;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::TENANT_HEADER;
use crate::config::AppConfig;
use crate::error::SessionError;
use crate::hub::EventHub;
use crate::ingestion::{IngestionPipeline, MediaStore};
use crate::queue::{MemoryQueue, WorkQueue};
use crate::repositories::{
    CustomerRepository, DeviceRepository, IdentityRepository, MessageRepository,
};
use crate::server::{AppState, create_app};
use crate::session::{ConnectionManager, EventSink, SessionClient, SessionFactory};

const TOKEN: &str = "test-token";

struct OfflineFactory;

#[async_trait]
impl SessionFactory for OfflineFactory {
    async fn create(
        &self,
        _tenant_id: Uuid,
        _store_path: PathBuf,
        _events: EventSink,
    ) -> Result<Arc<dyn SessionClient>, SessionError> {
        Err(SessionError::Network("network unreachable".to_string()))
    }
}

async fn test_app() -> (Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let shared = Arc::new(db.clone());

    let config = Arc::new(AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![TOKEN.to_string()],
        session_store_dir: dir.path().join("sessions").display().to_string(),
        uploads_dir: dir.path().join("uploads").display().to_string(),
        ..Default::default()
    });

    let queue: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new());
    let (hub, _hub_loop) = EventHub::new(&config.hub);
    let ingestion = Arc::new(IngestionPipeline::new(
        MessageRepository::new(Arc::clone(&shared)),
        IdentityRepository::new(Arc::clone(&shared)),
        CustomerRepository::new(Arc::clone(&shared)),
        queue,
        hub.clone(),
        MediaStore::new(config.uploads_dir.clone()),
    ));
    let sessions = ConnectionManager::new(
        Arc::new(OfflineFactory),
        DeviceRepository::new(shared),
        ingestion,
        hub.clone(),
        config.session_store_dir.clone(),
    );

    let app = create_app(AppState {
        config,
        db,
        sessions,
        hub,
    });
    (app, dir)
}

fn operator_request(method: &str, uri: &str, tenant: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", TOKEN))
        .header(TENANT_HEADER, tenant.to_string());
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_returns_service_info() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["service"], "tenant-gateway");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_reports_database_and_sessions() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
    assert_eq!(body["live_sessions"], 0);
}

#[tokio::test]
async fn operator_routes_require_a_token() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/whatsapp/status")
                .header(TENANT_HEADER, Uuid::new_v4().to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_without_any_record_reports_none() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(operator_request(
            "GET",
            "/api/whatsapp/status",
            Uuid::new_v4(),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["connected"], false);
    assert_eq!(body["source"], "none");
}

#[tokio::test]
async fn connect_surfaces_network_failures_as_bad_gateway() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(operator_request(
            "POST",
            "/api/whatsapp/connect",
            Uuid::new_v4(),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["code"], "NETWORK_ERROR");
}

#[tokio::test]
async fn send_without_session_is_not_found() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(operator_request(
            "POST",
            "/api/whatsapp/send",
            Uuid::new_v4(),
            Some(json!({ "recipient_jid": "62811@s.whatsapp.net", "message": "halo" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["code"], "SESSION_NOT_FOUND");
}

#[tokio::test]
async fn send_validates_the_request() {
    let (app, _dir) = test_app().await;
    let tenant = Uuid::new_v4();

    let missing_recipient = app
        .clone()
        .oneshot(operator_request(
            "POST",
            "/api/whatsapp/send",
            tenant,
            Some(json!({ "recipient_jid": "62811", "message": "halo" })),
        ))
        .await
        .unwrap();
    assert_eq!(missing_recipient.status(), StatusCode::BAD_REQUEST);

    let too_long = app
        .oneshot(operator_request(
            "POST",
            "/api/whatsapp/send",
            tenant,
            Some(json!({
                "recipient_jid": "62811@s.whatsapp.net",
                "message": "a".repeat(super::whatsapp::MAX_MESSAGE_CHARS + 1),
            })),
        ))
        .await
        .unwrap();
    assert_eq!(too_long.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn send_media_rejects_invalid_base64() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(operator_request(
            "POST",
            "/api/whatsapp/send-media",
            Uuid::new_v4(),
            Some(json!({
                "recipient_jid": "62811@s.whatsapp.net",
                "file_name": "menu.pdf",
                "data": "not base64!!",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn clear_messages_on_empty_chat_deletes_nothing() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(operator_request(
            "DELETE",
            "/api/whatsapp/messages/62811@s.whatsapp.net",
            Uuid::new_v4(),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["deleted_count"], 0);
}

#[tokio::test]
async fn bridge_events_without_session_are_not_found() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/bridge/{}/events", Uuid::new_v4()))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"disconnected"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn openapi_document_lists_operator_routes() {
    let (app, _dir) = test_app().await;
    let response = app
        .oneshot(
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["paths"]["/api/whatsapp/send"].is_object());
    assert!(body["paths"]["/api/bridge/{tenant_id}/events"].is_object());
}

#[tokio::test]
async fn error_bodies_carry_the_request_id() {
    let (app, _dir) = test_app().await;
    let mut request = operator_request(
        "POST",
        "/api/whatsapp/send",
        Uuid::new_v4(),
        Some(json!({ "recipient_jid": "62811@s.whatsapp.net", "message": "halo" })),
    );
    request
        .headers_mut()
        .insert("x-request-id", "req-send-1".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "req-send-1"
    );
    let body = json_body(response).await;
    assert_eq!(body["trace_id"], "req-send-1");
}

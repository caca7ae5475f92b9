//! HTTP bridge to an external protocol sidecar.
//!
//! The sidecar owns the network wire protocol and the per-tenant credential
//! store. Commands go out as JSON over HTTP; the sidecar pushes network
//! events back to `POST /api/bridge/{tenant}/events`, which the connection
//! manager routes into the tenant's event pump.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    ConnectOutcome, EventSink, MediaRef, OutboundMedia, SentMessage, SessionClient,
    SessionFactory,
};
use crate::error::SessionError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ConnectRequest<'a> {
    store_path: &'a str,
}

#[derive(Serialize)]
struct TextRequest<'a> {
    to: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct MediaRequest<'a> {
    to: &'a str,
    kind: &'a str,
    file_name: &'a str,
    caption: &'a str,
    /// Base64 of the file bytes.
    data: String,
}

#[derive(Debug, Deserialize)]
struct SessionInfo {
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    jid: Option<String>,
}

pub struct BridgeSessionFactory {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeSessionFactory {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| SessionError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SessionFactory for BridgeSessionFactory {
    async fn create(
        &self,
        tenant_id: Uuid,
        store_path: PathBuf,
        _events: EventSink,
    ) -> Result<Arc<dyn SessionClient>, SessionError> {
        Ok(Arc::new(BridgeSessionClient {
            http: self.http.clone(),
            base_url: format!("{}/sessions/{}", self.base_url, tenant_id),
            store_path,
        }))
    }
}

pub struct BridgeSessionClient {
    http: reqwest::Client,
    base_url: String,
    store_path: PathBuf,
}

impl BridgeSessionClient {
    async fn post<B: Serialize + ?Sized>(
        &self,
        action: &str,
        body: &B,
    ) -> Result<reqwest::Response, SessionError> {
        let url = format!("{}/{}", self.base_url, action);
        debug!(url = %url, "Bridge request");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))?;
        check(response).await
    }

    async fn info(&self) -> Result<SessionInfo, SessionError> {
        let response = self
            .http
            .get(&self.base_url)
            .send()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))?;
        check(response)
            .await?
            .json()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => SessionError::NotFound,
        StatusCode::CONFLICT => SessionError::NotConnected,
        StatusCode::PRECONDITION_REQUIRED => SessionError::PairingRequired,
        _ => SessionError::Network(format!("bridge returned {}: {}", status.as_u16(), body)),
    })
}

#[async_trait]
impl SessionClient for BridgeSessionClient {
    async fn connect(&self) -> Result<ConnectOutcome, SessionError> {
        let store_path = self.store_path.to_string_lossy();
        self.post(
            "connect",
            &ConnectRequest {
                store_path: &store_path,
            },
        )
        .await?
        .json()
        .await
        .map_err(|err| SessionError::Network(err.to_string()))
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.post("disconnect", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.post("logout", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.info().await {
            Ok(info) => info.connected,
            Err(SessionError::NotFound) => false,
            Err(err) => {
                warn!(error = %err, "Bridge status probe failed");
                false
            }
        }
    }

    async fn own_jid(&self) -> Option<String> {
        self.info().await.ok().and_then(|info| info.jid)
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, SessionError> {
        self.post("messages", &TextRequest { to, text })
            .await?
            .json()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))
    }

    async fn send_media(
        &self,
        to: &str,
        media: &OutboundMedia,
    ) -> Result<SentMessage, SessionError> {
        let request = MediaRequest {
            to,
            kind: media.kind.as_str(),
            file_name: &media.file_name,
            caption: &media.caption,
            data: STANDARD.encode(&media.bytes),
        };
        self.post("media", &request)
            .await?
            .json()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, SessionError> {
        let bytes = self
            .post("download", media)
            .await?
            .bytes()
            .await
            .map_err(|err| SessionError::Network(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MediaKind;
    use serde_json::json;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer, tenant: Uuid) -> Arc<dyn SessionClient> {
        let factory = BridgeSessionFactory::new(server.uri()).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        factory
            .create(tenant, PathBuf::from("/tmp/store.db"), tx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn connect_reports_pairing_code() {
        let server = MockServer::start().await;
        let tenant = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/connect", tenant)))
            .and(body_json(json!({"store_path": "/tmp/store.db"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"state": "pairing_required", "code": "ABCD-EFGH"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, tenant).await;
        assert_eq!(
            client.connect().await.unwrap(),
            ConnectOutcome::PairingRequired {
                code: "ABCD-EFGH".to_string()
            }
        );
    }

    #[tokio::test]
    async fn send_text_returns_network_id() {
        let server = MockServer::start().await;
        let tenant = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/messages", tenant)))
            .and(body_json(json!({"to": "62811@s.whatsapp.net", "text": "halo"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "3EB0FF",
                "timestamp": "2025-03-10T09:00:00Z"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, tenant).await;
        let sent = client
            .send_text("62811@s.whatsapp.net", "halo")
            .await
            .unwrap();
        assert_eq!(sent.message_id, "3EB0FF");
    }

    #[tokio::test]
    async fn media_is_sent_base64_encoded() {
        let server = MockServer::start().await;
        let tenant = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/media", tenant)))
            .and(body_json(json!({
                "to": "62811@s.whatsapp.net",
                "kind": "document",
                "file_name": "menu.pdf",
                "caption": "Menu",
                "data": "cGRm"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message_id": "3EB0AA",
                "timestamp": "2025-03-10T09:00:00Z"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, tenant).await;
        let media = OutboundMedia {
            kind: MediaKind::Document,
            bytes: b"pdf".to_vec(),
            file_name: "menu.pdf".to_string(),
            caption: "Menu".to_string(),
        };
        let sent = client
            .send_media("62811@s.whatsapp.net", &media)
            .await
            .unwrap();
        assert_eq!(sent.message_id, "3EB0AA");
    }

    #[tokio::test]
    async fn status_codes_map_to_session_errors() {
        let server = MockServer::start().await;
        let tenant = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/messages", tenant)))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/sessions/{}", tenant)))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = client_for(&server, tenant).await;
        assert!(matches!(
            client.send_text("62811@s.whatsapp.net", "x").await,
            Err(SessionError::NotConnected)
        ));
        assert!(!client.is_connected().await);
        assert_eq!(client.own_jid().await, None);
    }

    #[tokio::test]
    async fn download_returns_raw_bytes() {
        let server = MockServer::start().await;
        let tenant = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path(format!("/sessions/{}/download", tenant)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg".to_vec()))
            .mount(&server)
            .await;

        let client = client_for(&server, tenant).await;
        let bytes = client
            .download(&MediaRef {
                handle: "h1".to_string(),
                mime_type: None,
            })
            .await
            .unwrap();
        assert_eq!(bytes, b"jpeg");
    }
}

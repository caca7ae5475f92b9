//! Per-tenant session registry.
//!
//! Each tenant owns one slot guarded by its own async lock, so connect and
//! send calls for one tenant are serialized without blocking other tenants.
//! Network events flow through an unbounded channel into a pump task per
//! session; the pump never touches the slot lock except to retire a
//! logged-out session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    ConnectOutcome, EventSink, NetworkEvent, OutboundMedia, SentMessage, SessionClient,
    SessionFactory,
};
use crate::db::from_db_time;
use crate::error::SessionError;
use crate::hub::{EventHub, HubEvent};
use crate::ingestion::{IngestionPipeline, OutboundRecord};
use crate::jid;
use crate::repositories::DeviceRepository;
use crate::repositories::device::DeviceStatus;
use crate::repositories::message::MessageKind;
use crate::telemetry::metric_names;

/// Where a reported status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatusSource {
    /// An in-memory session answered.
    Live,
    /// No session in memory; last durable record.
    Recorded,
    /// Nothing known about the tenant.
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SessionStatus {
    pub connected: bool,
    pub jid: Option<String>,
    pub source: StatusSource,
    pub last_connected_at: Option<DateTime<Utc>>,
}

struct LiveSession {
    client: Arc<dyn SessionClient>,
    pump: CancellationToken,
    generation: u64,
}

#[derive(Default)]
struct Slot {
    live: Option<LiveSession>,
}

struct Inner {
    factory: Arc<dyn SessionFactory>,
    devices: DeviceRepository,
    ingestion: Arc<IngestionPipeline>,
    hub: EventHub,
    store_dir: PathBuf,
    slots: StdMutex<HashMap<Uuid, Arc<Mutex<Slot>>>>,
    /// Event senders by tenant, kept outside the slot lock so externally
    /// pushed events never wait on an in-flight connect.
    sinks: StdMutex<HashMap<Uuid, (u64, EventSink)>>,
    next_generation: AtomicU64,
    live: AtomicUsize,
    shutdown: CancellationToken,
}

/// Owner of every tenant's network session. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        devices: DeviceRepository,
        ingestion: Arc<IngestionPipeline>,
        hub: EventHub,
        store_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                factory,
                devices,
                ingestion,
                hub,
                store_dir: store_dir.into(),
                slots: StdMutex::new(HashMap::new()),
                sinks: StdMutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                live: AtomicUsize::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Ensure a session for the tenant and drive it to the network.
    ///
    /// An already connected session is returned as is. A session that exists
    /// but is not connected is torn down and recreated.
    pub async fn connect(&self, tenant_id: Uuid) -> Result<ConnectOutcome, SessionError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SessionError::Storage("connection manager is shut down".into()));
        }
        let slot = self.inner.slot(tenant_id);
        let mut slot = slot.lock().await;

        if let Some(live) = slot.live.as_ref()
            && live.client.is_connected().await
        {
            debug!(tenant_id = %tenant_id, "Reusing connected session");
            return Ok(ConnectOutcome::Connected {
                jid: live.client.own_jid().await,
            });
        }

        if let Some(stale) = slot.live.take() {
            info!(tenant_id = %tenant_id, "Replacing half-alive session");
            self.inner.retire(tenant_id, stale, false).await;
        }

        let live = self.inner.create_session(tenant_id).await?;
        let client = live.client.clone();
        slot.live = Some(live);

        match client.connect().await {
            Ok(ConnectOutcome::Connected { jid }) => {
                let jid = match jid {
                    Some(jid) => Some(jid),
                    None => client.own_jid().await,
                };
                self.inner
                    .record_connected(tenant_id, jid.clone(), None, None)
                    .await;
                info!(tenant_id = %tenant_id, jid = ?jid, "Session connected");
                Ok(ConnectOutcome::Connected { jid })
            }
            Ok(ConnectOutcome::PairingRequired { code }) => {
                info!(tenant_id = %tenant_id, "Session awaiting pairing");
                Ok(ConnectOutcome::PairingRequired { code })
            }
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "Session connect failed");
                if let Some(failed) = slot.live.take() {
                    self.inner.retire(tenant_id, failed, false).await;
                }
                self.inner.record_disconnected(tenant_id).await;
                Err(err)
            }
        }
    }

    /// Log out (when connected), release the session and record the downgrade.
    ///
    /// Idempotent: disconnecting a tenant without a session only updates the
    /// durable status.
    pub async fn disconnect(&self, tenant_id: Uuid) -> Result<(), SessionError> {
        let slot = self.inner.slot(tenant_id);
        let mut slot = slot.lock().await;
        if let Some(live) = slot.live.take() {
            self.inner.retire(tenant_id, live, true).await;
        }
        self.inner.record_disconnected(tenant_id).await;
        info!(tenant_id = %tenant_id, "Session disconnected");
        Ok(())
    }

    /// Live status when a session exists, otherwise the durable record.
    pub async fn status(&self, tenant_id: Uuid) -> Result<SessionStatus, SessionError> {
        let device = self
            .inner
            .devices
            .find(tenant_id)
            .await
            .map_err(|err| SessionError::Storage(err.to_string()))?;
        let last_connected_at = device
            .as_ref()
            .and_then(|d| d.last_connected_at)
            .map(from_db_time);

        let slot = self.inner.slot(tenant_id);
        let slot = slot.lock().await;
        if let Some(live) = slot.live.as_ref() {
            let jid = match live.client.own_jid().await {
                Some(jid) => Some(jid),
                None => device.as_ref().and_then(|d| d.jid.clone()),
            };
            return Ok(SessionStatus {
                connected: live.client.is_connected().await,
                jid,
                source: StatusSource::Live,
                last_connected_at,
            });
        }

        Ok(match device {
            Some(device) => SessionStatus {
                connected: device.is_connected,
                jid: device.jid,
                source: StatusSource::Recorded,
                last_connected_at,
            },
            None => SessionStatus {
                connected: false,
                jid: None,
                source: StatusSource::None,
                last_connected_at: None,
            },
        })
    }

    pub async fn send_text(
        &self,
        tenant_id: Uuid,
        to: &str,
        text: &str,
    ) -> Result<SentMessage, SessionError> {
        let to = jid::normalize(to);
        let (slot, client) = self.connected_client(tenant_id).await?;
        let sent = client.send_text(&to, text).await;
        drop(slot);
        let sent = match sent {
            Ok(sent) => sent,
            Err(err) => return Err(self.inner.send_failed(tenant_id, &client, err).await),
        };

        self.inner
            .ingestion
            .record_outbound(
                tenant_id,
                OutboundRecord {
                    to,
                    sent: sent.clone(),
                    kind: MessageKind::Text,
                    text: text.to_string(),
                    media_url: None,
                },
            )
            .await;
        Ok(sent)
    }

    /// Store the attachment locally, send it, then record it.
    pub async fn send_media(
        &self,
        tenant_id: Uuid,
        to: &str,
        media: OutboundMedia,
    ) -> Result<SentMessage, SessionError> {
        let to = jid::normalize(to);
        let (slot, client) = self.connected_client(tenant_id).await?;

        let media_url = match self
            .inner
            .ingestion
            .media()
            .store_outbound(tenant_id, media.kind, &media.file_name, &media.bytes, Utc::now())
            .await
        {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "Failed to store outbound media locally");
                None
            }
        };

        let sent = client.send_media(&to, &media).await;
        drop(slot);
        let sent = match sent {
            Ok(sent) => sent,
            Err(err) => return Err(self.inner.send_failed(tenant_id, &client, err).await),
        };

        self.inner
            .ingestion
            .record_outbound(
                tenant_id,
                OutboundRecord {
                    to,
                    sent: sent.clone(),
                    kind: media.kind.message_kind(),
                    text: media.caption.clone(),
                    media_url,
                },
            )
            .await;
        Ok(sent)
    }

    /// Delete the stored messages of one conversation.
    pub async fn clear_chat(&self, tenant_id: Uuid, chat_jid: &str) -> Result<u64, SessionError> {
        self.inner
            .ingestion
            .clear_conversation(tenant_id, chat_jid)
            .await
            .map_err(|err| SessionError::Storage(err.to_string()))
    }

    /// Hand an externally received event to the tenant's session pump.
    pub fn deliver(&self, tenant_id: Uuid, event: NetworkEvent) -> Result<(), SessionError> {
        let sinks = lock(&self.inner.sinks);
        let (_, sink) = sinks.get(&tenant_id).ok_or(SessionError::NotFound)?;
        sink.send(event).map_err(|_| SessionError::NotFound)
    }

    pub fn live_count(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Stop every pump and disconnect every session. Durable status is kept
    /// so the next start can reconnect.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let slots: Vec<(Uuid, Arc<Mutex<Slot>>)> = lock(&self.inner.slots)
            .iter()
            .map(|(tenant, slot)| (*tenant, slot.clone()))
            .collect();
        for (tenant_id, slot) in slots {
            let mut slot = slot.lock().await;
            if let Some(live) = slot.live.take() {
                self.inner.retire(tenant_id, live, false).await;
            }
        }
        info!("Connection manager stopped");
    }

    /// The tenant's connected client together with its locked slot.
    ///
    /// Callers keep the guard until the network call returns, so one tenant
    /// has at most one send in flight and a concurrent connect or disconnect
    /// waits for it.
    async fn connected_client(
        &self,
        tenant_id: Uuid,
    ) -> Result<(OwnedMutexGuard<Slot>, Arc<dyn SessionClient>), SessionError> {
        let slot = self.inner.slot(tenant_id).lock_owned().await;
        let live = slot.live.as_ref().ok_or(SessionError::NotFound)?;
        if !live.client.is_connected().await {
            return Err(SessionError::NotConnected);
        }
        let client = live.client.clone();
        Ok((slot, client))
    }
}

impl Inner {
    fn slot(&self, tenant_id: Uuid) -> Arc<Mutex<Slot>> {
        lock(&self.slots).entry(tenant_id).or_default().clone()
    }

    async fn create_session(self: &Arc<Self>, tenant_id: Uuid) -> Result<LiveSession, SessionError> {
        tokio::fs::create_dir_all(&self.store_dir)
            .await
            .map_err(|err| SessionError::Storage(err.to_string()))?;
        let store_path = self.store_dir.join(format!("store_{}.db", tenant_id));

        let (events, receiver) = mpsc::unbounded_channel();
        let client = self
            .factory
            .create(tenant_id, store_path, events.clone())
            .await?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let pump = self.shutdown.child_token();
        lock(&self.sinks).insert(tenant_id, (generation, events));

        let live_now = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        gauge!(metric_names::LIVE_SESSIONS).set(live_now as f64);

        tokio::spawn(self.clone().pump(
            tenant_id,
            generation,
            client.clone(),
            receiver,
            pump.clone(),
        ));

        Ok(LiveSession {
            client,
            pump,
            generation,
        })
    }

    /// Stop a session's pump and release the client. The caller holds the slot.
    async fn retire(&self, tenant_id: Uuid, live: LiveSession, logout: bool) {
        live.pump.cancel();
        {
            let mut sinks = lock(&self.sinks);
            if sinks
                .get(&tenant_id)
                .is_some_and(|(generation, _)| *generation == live.generation)
            {
                sinks.remove(&tenant_id);
            }
        }

        if logout && live.client.is_connected().await {
            if let Err(err) = live.client.logout().await {
                warn!(tenant_id = %tenant_id, error = %err, "Logout failed; disconnecting");
            }
        }
        if let Err(err) = live.client.disconnect().await {
            debug!(tenant_id = %tenant_id, error = %err, "Disconnect of retired session failed");
        }

        let live_now = self.live.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        gauge!(metric_names::LIVE_SESSIONS).set(live_now as f64);
    }

    async fn send_failed(
        &self,
        tenant_id: Uuid,
        client: &Arc<dyn SessionClient>,
        err: SessionError,
    ) -> SessionError {
        warn!(tenant_id = %tenant_id, error = %err, "Send failed");
        if matches!(err, SessionError::Network(_)) && !client.is_connected().await {
            self.record_disconnected(tenant_id).await;
        }
        err
    }

    async fn record_connected(
        &self,
        tenant_id: Uuid,
        jid: Option<String>,
        platform: Option<String>,
        push_name: Option<String>,
    ) {
        let status = DeviceStatus {
            jid: jid.as_deref().map(jid::normalize),
            is_connected: true,
            platform,
            push_name,
        };
        if let Err(err) = self.devices.upsert_status(tenant_id, status).await {
            error!(tenant_id = %tenant_id, error = %err, "Failed to record connected status");
        }
        self.hub.publish(
            tenant_id,
            HubEvent::ConnectionStatus,
            json!({ "connected": true, "jid": jid }),
        );
    }

    async fn record_disconnected(&self, tenant_id: Uuid) {
        if let Err(err) = self.devices.mark_disconnected(tenant_id).await {
            error!(tenant_id = %tenant_id, error = %err, "Failed to record disconnected status");
        }
        self.hub.publish(
            tenant_id,
            HubEvent::ConnectionStatus,
            json!({ "connected": false }),
        );
    }

    async fn pump(
        self: Arc<Self>,
        tenant_id: Uuid,
        generation: u64,
        client: Arc<dyn SessionClient>,
        mut events: mpsc::UnboundedReceiver<NetworkEvent>,
        cancel: CancellationToken,
    ) {
        debug!(tenant_id = %tenant_id, generation, "Session event pump started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(tenant_id, generation, client.as_ref(), event).await,
                    None => break,
                }
            }
        }
        debug!(tenant_id = %tenant_id, generation, "Session event pump stopped");
    }

    async fn dispatch(
        &self,
        tenant_id: Uuid,
        generation: u64,
        client: &dyn SessionClient,
        event: NetworkEvent,
    ) {
        debug!(tenant_id = %tenant_id, event = event.name(), "Network event");
        match event {
            NetworkEvent::Message(message) => {
                self.ingestion
                    .ingest_message(tenant_id, client, message)
                    .await;
            }
            NetworkEvent::Connected { jid, push_name } => {
                let jid = match jid {
                    Some(jid) => Some(jid),
                    None => client.own_jid().await,
                };
                self.record_connected(tenant_id, jid, None, push_name).await;
            }
            NetworkEvent::Disconnected => {
                info!(tenant_id = %tenant_id, "Network reported disconnect");
                self.record_disconnected(tenant_id).await;
            }
            NetworkEvent::LoggedOut => {
                info!(tenant_id = %tenant_id, "Device logged out");
                self.record_disconnected(tenant_id).await;
                self.retire_generation(tenant_id, generation).await;
            }
            NetworkEvent::PairSuccess {
                jid,
                platform,
                push_name,
            } => {
                info!(tenant_id = %tenant_id, jid = %jid, "Device paired");
                let platform = platform.or_else(|| Some("web".to_string()));
                self.record_connected(tenant_id, Some(jid), platform, push_name)
                    .await;
            }
            NetworkEvent::HistorySync { conversations } => {
                self.ingestion
                    .ingest_history(tenant_id, conversations)
                    .await;
            }
            NetworkEvent::Receipt(receipt) => {
                self.ingestion.handle_receipt(tenant_id, receipt).await;
            }
        }
    }

    /// Drop the session that reported logout, unless it was already replaced.
    async fn retire_generation(&self, tenant_id: Uuid, generation: u64) {
        let slot = self.slot(tenant_id);
        let mut slot = slot.lock().await;
        if slot
            .live
            .as_ref()
            .is_some_and(|live| live.generation == generation)
            && let Some(live) = slot.live.take()
        {
            self.retire(tenant_id, live, false).await;
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

//! Test utilities shared by the integration suites.
//!
//! Provides an in-memory SQLite database with migrations applied, tenant and
//! AI-config fixtures, a scripted network client and a scripted language
//! model, plus a [`Harness`] wiring them into the real pipeline.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, Set};
use tempfile::TempDir;
use uuid::Uuid;

use tenant_gateway::ai::{GenerateRequest, Generation, LanguageModel, ModelResolver};
use tenant_gateway::config::AutoReplyConfig;
use tenant_gateway::db::to_db_time;
use tenant_gateway::error::{ProviderError, SessionError};
use tenant_gateway::hub::{EventHub, HubLoop};
use tenant_gateway::ingestion::{IngestionPipeline, MediaStore};
use tenant_gateway::models::{ai_config, tenant};
use tenant_gateway::queue::{MemoryQueue, WorkQueue};
use tenant_gateway::repositories::ai::TenantAiSettings;
use tenant_gateway::repositories::{
    AiRepository, BroadcastRepository, CustomerRepository, DeviceRepository, IdentityRepository,
    MessageRepository,
};
use tenant_gateway::session::{
    ConnectOutcome, ConnectionManager, EventSink, MediaRef, OutboundMedia, SentMessage,
    SessionClient, SessionFactory,
};
use tenant_gateway::workers::AutoReplyWorker;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Creates an active tenant and returns its id.
pub async fn create_test_tenant(db: &DatabaseConnection) -> Result<Uuid> {
    let id = Uuid::new_v4();
    tenant::ActiveModel {
        id: Set(id),
        name: Set(Some("Warung Test".to_string())),
        is_active: Set(true),
        created_at: Set(to_db_time(Utc::now())),
    }
    .insert(db)
    .await?;
    Ok(id)
}

/// Enables automated replies for a tenant with the given threshold.
pub async fn enable_ai(db: &DatabaseConnection, tenant_id: Uuid, threshold: f64) -> Result<()> {
    let now = to_db_time(Utc::now());
    ai_config::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        enabled: Set(true),
        ai_provider: Set("gemini".to_string()),
        model: Set("gemini-1.5-flash".to_string()),
        use_system_key: Set(true),
        user_api_key: Set(None),
        confidence_threshold: Set(threshold),
        max_tokens: Set(200),
        system_prompt: Set(None),
        business_name: Set(Some("Warung Test".to_string())),
        business_type: Set(None),
        business_hours: Set(Some("08:00-21:00".to_string())),
        business_description: Set(None),
        business_address: Set(None),
        payment_methods: Set(None),
        escalate_complaint: Set(true),
        escalate_order: Set(false),
        total_requests: Set(0),
        total_tokens_used: Set(0),
        total_cost_usd: Set(0.0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;
    Ok(())
}

/// A message the fake network accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub tenant_id: Uuid,
    pub to: String,
    pub text: String,
}

/// Shared state behind every [`FakeClient`] a [`FakeFactory`] hands out.
#[derive(Default)]
pub struct FakeNetwork {
    pub sent: Mutex<Vec<SentRecord>>,
    pub created: AtomicUsize,
    pub require_pairing: AtomicBool,
    pub fail_sends: AtomicBool,
    /// How long each send takes.
    pub send_delay_ms: AtomicU64,
    /// Most sends observed in flight at once.
    pub peak_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    sinks: Mutex<HashMap<Uuid, EventSink>>,
    next_id: AtomicUsize,
}

impl FakeNetwork {
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    /// The event sink of the most recently created session for `tenant_id`.
    pub fn sink(&self, tenant_id: Uuid) -> Option<EventSink> {
        self.sinks.lock().unwrap().get(&tenant_id).cloned()
    }

    fn next_message_id(&self) -> String {
        format!("SENT{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

pub struct FakeClient {
    tenant_id: Uuid,
    network: Arc<FakeNetwork>,
    connected: AtomicBool,
}

#[async_trait]
impl SessionClient for FakeClient {
    async fn connect(&self) -> Result<ConnectOutcome, SessionError> {
        if self.network.require_pairing.load(Ordering::Relaxed) {
            return Ok(ConnectOutcome::PairingRequired {
                code: "ABCD-1234".to_string(),
            });
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(ConnectOutcome::Connected {
            jid: Some("62800000001@s.whatsapp.net".to_string()),
        })
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn logout(&self) -> Result<(), SessionError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn own_jid(&self) -> Option<String> {
        self.connected
            .load(Ordering::Relaxed)
            .then(|| "62800000001@s.whatsapp.net".to_string())
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, SessionError> {
        let in_flight = self.network.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.network
            .peak_in_flight
            .fetch_max(in_flight, Ordering::SeqCst);
        let delay = self.network.send_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let result = self.record_send(to, text);
        self.network.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn send_media(
        &self,
        to: &str,
        media: &OutboundMedia,
    ) -> Result<SentMessage, SessionError> {
        self.send_text(to, &media.caption).await
    }

    async fn download(&self, _media: &MediaRef) -> Result<Vec<u8>, SessionError> {
        Ok(b"fake-media".to_vec())
    }
}

impl FakeClient {
    fn record_send(&self, to: &str, text: &str) -> Result<SentMessage, SessionError> {
        if self.network.fail_sends.load(Ordering::Relaxed) {
            return Err(SessionError::Network("send rejected".to_string()));
        }
        self.network.sent.lock().unwrap().push(SentRecord {
            tenant_id: self.tenant_id,
            to: to.to_string(),
            text: text.to_string(),
        });
        Ok(SentMessage {
            message_id: self.network.next_message_id(),
            timestamp: Utc::now(),
        })
    }
}

pub struct FakeFactory {
    pub network: Arc<FakeNetwork>,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(
        &self,
        tenant_id: Uuid,
        _store_path: PathBuf,
        events: EventSink,
    ) -> Result<Arc<dyn SessionClient>, SessionError> {
        self.network.created.fetch_add(1, Ordering::Relaxed);
        self.network.sinks.lock().unwrap().insert(tenant_id, events);
        Ok(Arc::new(FakeClient {
            tenant_id,
            network: Arc::clone(&self.network),
            connected: AtomicBool::new(false),
        }))
    }
}

/// Language model answering every prompt with the same generation.
pub struct ScriptedModel {
    pub reply: String,
    pub confidence: f64,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<Generation, ProviderError> {
        Ok(Generation {
            text: self.reply.clone(),
            confidence: self.confidence,
            input_tokens: u32::try_from(request.user_message.len()).unwrap_or(u32::MAX),
            output_tokens: 12,
            cost_usd: 0.0001,
            model: "scripted-1".to_string(),
        })
    }
}

pub struct ScriptedResolver {
    pub model: Arc<dyn LanguageModel>,
}

impl ScriptedResolver {
    pub fn replying(reply: &str, confidence: f64) -> Self {
        Self {
            model: Arc::new(ScriptedModel {
                reply: reply.to_string(),
                confidence,
            }),
        }
    }
}

impl ModelResolver for ScriptedResolver {
    fn resolve(
        &self,
        _tenant_id: Uuid,
        _settings: &TenantAiSettings,
    ) -> Result<Arc<dyn LanguageModel>, ProviderError> {
        Ok(Arc::clone(&self.model))
    }
}

/// The real pipeline over an in-memory database and a fake network.
pub struct Harness {
    pub db: DatabaseConnection,
    pub dir: TempDir,
    pub network: Arc<FakeNetwork>,
    pub queue: Arc<MemoryQueue>,
    pub hub: EventHub,
    pub hub_loop: Option<HubLoop>,
    pub ingestion: Arc<IngestionPipeline>,
    pub sessions: ConnectionManager,
    pub messages: MessageRepository,
    pub customers: CustomerRepository,
    pub broadcasts: BroadcastRepository,
    pub devices: DeviceRepository,
    pub ai: AiRepository,
    pub media: MediaStore,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        Self::with_database(setup_test_db().await?).await
    }

    /// A fresh pipeline over an existing database, as after a restart.
    pub async fn with_database(db: DatabaseConnection) -> Result<Self> {
        let shared = Arc::new(db.clone());
        let dir = TempDir::new()?;
        let network = Arc::new(FakeNetwork::default());
        let queue = Arc::new(MemoryQueue::new());
        let (hub, hub_loop) = EventHub::new(&Default::default());
        let media = MediaStore::new(dir.path().join("uploads"));

        let messages = MessageRepository::new(Arc::clone(&shared));
        let customers = CustomerRepository::new(Arc::clone(&shared));
        let devices = DeviceRepository::new(Arc::clone(&shared));
        let ingestion = Arc::new(IngestionPipeline::new(
            messages.clone(),
            IdentityRepository::new(Arc::clone(&shared)),
            customers.clone(),
            queue.clone() as Arc<dyn WorkQueue>,
            hub.clone(),
            media.clone(),
        ));
        let sessions = ConnectionManager::new(
            Arc::new(FakeFactory {
                network: Arc::clone(&network),
            }),
            devices.clone(),
            Arc::clone(&ingestion),
            hub.clone(),
            dir.path().join("sessions"),
        );

        Ok(Self {
            broadcasts: BroadcastRepository::new(Arc::clone(&shared)),
            ai: AiRepository::new(shared),
            db,
            dir,
            network,
            queue,
            hub,
            hub_loop: Some(hub_loop),
            ingestion,
            sessions,
            messages,
            customers,
            devices,
            media,
        })
    }

    pub fn work_queue(&self) -> Arc<dyn WorkQueue> {
        self.queue.clone()
    }

    /// Client handle for calling the ingestion pipeline directly.
    pub fn client(&self, tenant_id: Uuid) -> FakeClient {
        FakeClient {
            tenant_id,
            network: Arc::clone(&self.network),
            connected: AtomicBool::new(true),
        }
    }

    pub fn auto_reply_worker(&self, resolver: ScriptedResolver) -> AutoReplyWorker {
        AutoReplyWorker::new(
            self.work_queue(),
            self.ai.clone(),
            self.messages.clone(),
            self.customers.clone(),
            Arc::new(resolver),
            self.sessions.clone(),
            self.hub.clone(),
            self.media.clone(),
            AutoReplyConfig::default(),
        )
    }
}

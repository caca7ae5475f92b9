//! # Gateway Runtime
//!
//! Builds every long-lived component from an [`AppConfig`] and runs them
//! under one cancellation token: the event hub loop, the auto-reply worker
//! pool, the broadcast delivery worker, the broadcast scheduler, the startup
//! reconnect sweep and the HTTP server.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use migration::{Migrator, MigratorTrait};
use sea_orm::DatabaseConnection;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::{HttpModelResolver, ModelResolver};
use crate::broadcast::BroadcastScheduler;
use crate::config::{AppConfig, QueueBackend};
use crate::crypto::CryptoKey;
use crate::db::init_pool;
use crate::hub::{EventHub, HubLoop};
use crate::ingestion::{IngestionPipeline, MediaStore};
use crate::queue::{DatabaseQueue, MemoryQueue, WorkQueue};
use crate::repositories::{
    AiRepository, BroadcastRepository, CustomerRepository, DeviceRepository, IdentityRepository,
    MessageRepository,
};
use crate::server::{AppState, run_server};
use crate::session::ConnectionManager;
use crate::session::bridge::BridgeSessionFactory;
use crate::session::reconnect::reconnect_sweep;
use crate::workers::{AutoReplyWorker, DeliveryWorker};

/// Fully wired gateway, ready to run.
pub struct Gateway {
    config: Arc<AppConfig>,
    db: DatabaseConnection,
    devices: DeviceRepository,
    hub: EventHub,
    hub_loop: HubLoop,
    sessions: ConnectionManager,
    auto_reply: AutoReplyWorker,
    delivery: DeliveryWorker,
    scheduler: BroadcastScheduler,
}

impl Gateway {
    /// Connect the database, apply migrations and assemble the components.
    pub async fn build(config: AppConfig) -> Result<Self> {
        let config = Arc::new(config);

        let db = init_pool(&config).await?;
        Migrator::up(&db, None)
            .await
            .context("failed to apply database migrations")?;
        let shared = Arc::new(db.clone());

        ensure_dir(&config.session_store_dir).await?;
        ensure_dir(&config.uploads_dir).await?;

        let devices = DeviceRepository::new(Arc::clone(&shared));
        let messages = MessageRepository::new(Arc::clone(&shared));
        let customers = CustomerRepository::new(Arc::clone(&shared));
        let identities = IdentityRepository::new(Arc::clone(&shared));
        let ai = AiRepository::new(Arc::clone(&shared));
        let broadcasts = BroadcastRepository::new(Arc::clone(&shared));

        let queue: Arc<dyn WorkQueue> = match config.queue.backend {
            QueueBackend::Database => Arc::new(DatabaseQueue::new(shared, &config.queue)),
            QueueBackend::Memory => Arc::new(MemoryQueue::new()),
        };

        let (hub, hub_loop) = EventHub::new(&config.hub);
        let media = MediaStore::new(config.uploads_dir.clone());
        let ingestion = Arc::new(IngestionPipeline::new(
            messages.clone(),
            identities,
            customers.clone(),
            Arc::clone(&queue),
            hub.clone(),
            media.clone(),
        ));

        let bridge_url = config
            .bridge_base_url
            .clone()
            .ok_or_else(|| anyhow!("GATEWAY_BRIDGE_BASE_URL must be set to reach the network"))?;
        let factory = Arc::new(BridgeSessionFactory::new(bridge_url)?);
        let sessions = ConnectionManager::new(
            factory,
            devices.clone(),
            ingestion,
            hub.clone(),
            config.session_store_dir.clone(),
        );

        let crypto_key = config
            .crypto_key
            .clone()
            .map(CryptoKey::new)
            .transpose()
            .context("invalid crypto key")?;
        let resolver: Arc<dyn ModelResolver> = Arc::new(HttpModelResolver::new(
            config.llm.clone(),
            crypto_key,
            config.auto_reply.provider_timeout(),
        )?);

        let auto_reply = AutoReplyWorker::new(
            Arc::clone(&queue),
            ai,
            messages,
            customers,
            resolver,
            sessions.clone(),
            hub.clone(),
            media,
            config.auto_reply.clone(),
        );
        let delivery = DeliveryWorker::new(
            Arc::clone(&queue),
            broadcasts.clone(),
            sessions.clone(),
            hub.clone(),
            config.delivery.clone(),
        );
        let scheduler =
            BroadcastScheduler::new(broadcasts, queue, config.broadcast_scheduler.clone());

        Ok(Self {
            config,
            db,
            devices,
            hub,
            hub_loop,
            sessions,
            auto_reply,
            delivery,
            scheduler,
        })
    }

    /// Run every component until `shutdown` fires or the HTTP server exits.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            config,
            db,
            devices,
            hub,
            hub_loop,
            sessions,
            auto_reply,
            delivery,
            scheduler,
        } = self;

        // The hub outlives everything that publishes into it.
        let hub_shutdown = CancellationToken::new();
        let hub_task = tokio::spawn(hub_loop.run(hub_shutdown.clone()));

        let mut tasks = JoinSet::new();
        if config.auto_reply.enabled {
            for worker_id in 0..config.auto_reply.workers {
                tasks.spawn(auto_reply.clone().run(worker_id, shutdown.clone()));
            }
        } else {
            info!("Auto-reply workers disabled");
        }
        tasks.spawn(delivery.run(shutdown.clone()));
        tasks.spawn(scheduler.run(shutdown.clone()));

        let sweep_shutdown = shutdown.clone();
        let sweep_sessions = sessions.clone();
        let reconnect = config.reconnect.clone();
        tasks.spawn(async move {
            let stats = reconnect_sweep(sweep_sessions, devices, reconnect, sweep_shutdown).await;
            debug!(?stats, "Reconnect sweep finished");
        });

        let state = AppState {
            config: Arc::clone(&config),
            db,
            sessions: sessions.clone(),
            hub,
        };
        let server_result = run_server(state, shutdown.clone()).await;
        if let Err(err) = &server_result {
            warn!(error = %err, "HTTP server exited with an error");
        }
        shutdown.cancel();

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "Background task panicked");
            }
        }
        sessions.shutdown().await;

        hub_shutdown.cancel();
        if let Err(err) = hub_task.await {
            warn!(error = %err, "Hub loop panicked");
        }
        info!("Gateway stopped");
        server_result
    }
}

async fn ensure_dir(path: &str) -> Result<()> {
    if !Path::new(path).exists() {
        tokio::fs::create_dir_all(path)
            .await
            .with_context(|| format!("failed to create directory {}", path))?;
    }
    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("Received SIGINT, shutting down"),
                        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    }
                }
                Err(err) => {
                    warn!(error = %err, "SIGTERM handler unavailable; waiting for Ctrl+C only");
                    let _ = ctrl_c.await;
                    info!("Received SIGINT, shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Received Ctrl+C, shutting down");
        }

        trigger.cancel();
    });

    token
}

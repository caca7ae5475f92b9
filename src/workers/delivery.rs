//! Broadcast delivery worker.
//!
//! Drains the delivery lane. The recipient row is the dedup guard: a job
//! whose recipient is no longer `queued` was already handled by an earlier
//! run and is dropped without sending.

use std::sync::Arc;

use metrics::counter;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DeliveryConfig;
use crate::hub::{EventHub, HubEvent};
use crate::queue::{self, DeliveryJob, WorkQueue};
use crate::repositories::BroadcastRepository;
use crate::repositories::broadcast::recipient_status;
use crate::session::ConnectionManager;
use crate::telemetry::metric_names;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    /// The recipient was already finished or no longer exists.
    Skipped,
    StorageFailed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Skipped => "skipped",
            DeliveryOutcome::StorageFailed => "storage_failed",
        }
    }
}

#[derive(Clone)]
pub struct DeliveryWorker {
    queue: Arc<dyn WorkQueue>,
    broadcasts: BroadcastRepository,
    sessions: ConnectionManager,
    hub: EventHub,
    config: DeliveryConfig,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        broadcasts: BroadcastRepository,
        sessions: ConnectionManager,
        hub: EventHub,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            queue,
            broadcasts,
            sessions,
            hub,
            config,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting broadcast delivery worker");
        loop {
            let popped = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Broadcast delivery worker shutdown requested");
                    break;
                }
                popped = queue::dequeue::<DeliveryJob>(self.queue.as_ref(), self.config.pop_timeout()) => popped,
            };

            match popped {
                Ok(Some(job)) => {
                    counter!(metric_names::QUEUE_POPS, "lane" => "broadcast_delivery").increment(1);
                    self.process(&job).await;
                }
                Ok(None) => {}
                Err(err) => {
                    error!(error = %err, "Failed to pop delivery job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.pop_timeout()) => {}
                    }
                }
            }
        }
        info!("Broadcast delivery worker stopped");
    }

    pub async fn process(&self, job: &DeliveryJob) -> DeliveryOutcome {
        let outcome = self.deliver(job).await;
        counter!(metric_names::DELIVERIES, "outcome" => outcome.as_str()).increment(1);

        if matches!(outcome, DeliveryOutcome::Sent | DeliveryOutcome::Failed) {
            match self.broadcasts.complete_if_drained(job.broadcast_id).await {
                Ok(true) => info!(broadcast_id = %job.broadcast_id, "Broadcast completed"),
                Ok(false) => {}
                Err(err) => {
                    warn!(broadcast_id = %job.broadcast_id, error = %err, "Failed to check broadcast completion")
                }
            }
        }
        outcome
    }

    async fn deliver(&self, job: &DeliveryJob) -> DeliveryOutcome {
        match self.broadcasts.find_recipient(job.recipient_id).await {
            Ok(Some(recipient)) if recipient.status == recipient_status::QUEUED => {}
            Ok(_) => {
                debug!(recipient_id = %job.recipient_id, "Recipient no longer queued; dropping job");
                return DeliveryOutcome::Skipped;
            }
            Err(err) => {
                error!(recipient_id = %job.recipient_id, error = %err, "Failed to load broadcast recipient");
                return DeliveryOutcome::StorageFailed;
            }
        }

        match self
            .sessions
            .send_text(job.tenant_id, &job.customer_jid, &job.message)
            .await
        {
            Ok(sent) => {
                match self
                    .broadcasts
                    .record_delivery_success(job.broadcast_id, job.recipient_id, &sent.message_id)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(recipient_id = %job.recipient_id, "Recipient finished while sending")
                    }
                    Err(err) => {
                        error!(recipient_id = %job.recipient_id, error = %err, "Failed to record delivery");
                        return DeliveryOutcome::StorageFailed;
                    }
                }
                self.hub.publish(
                    job.tenant_id,
                    HubEvent::MessageSent,
                    json!({
                        "broadcast_id": job.broadcast_id,
                        "recipient_id": job.recipient_id,
                        "customer_jid": job.customer_jid,
                        "customer_name": job.customer_name,
                        "message_id": sent.message_id,
                        "status": recipient_status::SENT,
                    }),
                );
                DeliveryOutcome::Sent
            }
            Err(err) => {
                warn!(
                    broadcast_id = %job.broadcast_id,
                    recipient_id = %job.recipient_id,
                    error = %err,
                    "Broadcast send failed"
                );
                if let Err(db_err) = self
                    .broadcasts
                    .record_delivery_failure(job.broadcast_id, job.recipient_id, &err.to_string())
                    .await
                {
                    error!(recipient_id = %job.recipient_id, error = %db_err, "Failed to record delivery failure");
                    return DeliveryOutcome::StorageFailed;
                }
                DeliveryOutcome::Failed
            }
        }
    }
}

//! Automated-reply worker.
//!
//! Consumes the auto-reply lane. Every popped job ends in exactly one
//! finalize step that stamps the message and counts it against the customer
//! aggregate, whatever happened while deciding on a reply.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ai::context::{self, DEFAULT_SYSTEM_PROMPT};
use crate::ai::{Decision, GenerateRequest, Generation, Intent, LanguageModel, ModelResolver};
use crate::ai::{escalation, intent};
use crate::config::AutoReplyConfig;
use crate::error::ProviderError;
use crate::hub::{EventHub, HubEvent};
use crate::ingestion::MediaStore;
use crate::models::{customer_insight, knowledge_entry};
use crate::queue::{self, AutoReplyJob, WorkQueue};
use crate::repositories::ai::{ConversationLogEntry, TenantAiSettings};
use crate::repositories::{AiRepository, CustomerRepository, MessageRepository};
use crate::session::{ConnectionManager, MediaKind, OutboundMedia};
use crate::telemetry::metric_names;

/// How one job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoReplyOutcome {
    /// Auto-reply is switched off for the tenant.
    Disabled,
    /// No model credential could be resolved.
    Unconfigured,
    /// Nothing to answer (media without caption).
    Skipped,
    Replied,
    Escalated,
    /// The model answered but the reply could not be sent.
    SendFailed,
    ProviderFailed,
    StorageFailed,
}

impl AutoReplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoReplyOutcome::Disabled => "disabled",
            AutoReplyOutcome::Unconfigured => "unconfigured",
            AutoReplyOutcome::Skipped => "skipped",
            AutoReplyOutcome::Replied => "replied",
            AutoReplyOutcome::Escalated => "escalated",
            AutoReplyOutcome::SendFailed => "send_failed",
            AutoReplyOutcome::ProviderFailed => "provider_failed",
            AutoReplyOutcome::StorageFailed => "storage_failed",
        }
    }

    /// Whether a model reply was produced for the message.
    fn answered(&self) -> bool {
        matches!(
            self,
            AutoReplyOutcome::Replied | AutoReplyOutcome::Escalated | AutoReplyOutcome::SendFailed
        )
    }
}

#[derive(Clone)]
pub struct AutoReplyWorker {
    queue: Arc<dyn WorkQueue>,
    ai: AiRepository,
    messages: MessageRepository,
    customers: CustomerRepository,
    resolver: Arc<dyn ModelResolver>,
    sessions: ConnectionManager,
    hub: EventHub,
    media: MediaStore,
    http: reqwest::Client,
    config: AutoReplyConfig,
}

impl AutoReplyWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        ai: AiRepository,
        messages: MessageRepository,
        customers: CustomerRepository,
        resolver: Arc<dyn ModelResolver>,
        sessions: ConnectionManager,
        hub: EventHub,
        media: MediaStore,
        config: AutoReplyConfig,
    ) -> Self {
        Self {
            queue,
            ai,
            messages,
            customers,
            resolver,
            sessions,
            hub,
            media,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Pop and process jobs until shutdown is requested.
    pub async fn run(self, worker_id: u32, shutdown: CancellationToken) {
        info!(worker_id, "Starting auto-reply worker");
        loop {
            let popped = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(worker_id, "Auto-reply worker shutdown requested");
                    break;
                }
                popped = queue::dequeue::<AutoReplyJob>(self.queue.as_ref(), self.config.pop_timeout()) => popped,
            };

            match popped {
                Ok(Some(job)) => {
                    counter!(metric_names::QUEUE_POPS, "lane" => "auto_reply").increment(1);
                    self.process(&job).await;
                }
                Ok(None) => {}
                Err(err) => {
                    error!(worker_id, error = %err, "Failed to pop auto-reply job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.pop_timeout()) => {}
                    }
                }
            }
        }
        info!(worker_id, "Auto-reply worker stopped");
    }

    /// Decide on a reply for one job and finalize it.
    pub async fn process(&self, job: &AutoReplyJob) -> AutoReplyOutcome {
        let started = Instant::now();
        let outcome = self.respond(job, started).await;
        self.finalize(job, outcome).await;

        counter!(metric_names::AUTO_REPLY_OUTCOMES, "outcome" => outcome.as_str()).increment(1);
        histogram!(metric_names::AUTO_REPLY_LATENCY_MS)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            tenant_id = %job.tenant_id,
            message_id = %job.message_id,
            outcome = outcome.as_str(),
            "Auto-reply job finished"
        );
        outcome
    }

    async fn respond(&self, job: &AutoReplyJob, started: Instant) -> AutoReplyOutcome {
        let tenant_id = job.tenant_id;
        let settings = match self.ai.load_settings(tenant_id).await {
            Ok(settings) => settings,
            Err(err) => {
                error!(tenant_id = %tenant_id, error = %err, "Failed to load AI settings");
                return AutoReplyOutcome::StorageFailed;
            }
        };
        if !settings.enabled {
            return AutoReplyOutcome::Disabled;
        }
        if job.message_text.trim().is_empty() {
            return AutoReplyOutcome::Skipped;
        }

        let intent = intent::classify(&job.message_text);
        let model = match self.resolver.resolve(tenant_id, &settings) {
            Ok(model) => model,
            Err(ProviderError::MissingCredential { provider }) => {
                warn!(tenant_id = %tenant_id, provider = %provider, "No model credential; skipping auto-reply");
                return AutoReplyOutcome::Unconfigured;
            }
            Err(err) => {
                self.record_provider_failure(job, intent, &err, None, started)
                    .await;
                return AutoReplyOutcome::ProviderFailed;
            }
        };

        let knowledge = self
            .ai
            .active_knowledge(tenant_id, self.config.knowledge_limit)
            .await
            .unwrap_or_else(|err| {
                warn!(tenant_id = %tenant_id, error = %err, "Failed to load knowledge entries");
                Vec::new()
            });
        let prompt_context = self.build_context(job, &settings, &knowledge).await;
        let system_prompt = settings
            .system_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        let generation = match self
            .generate(
                model.as_ref(),
                GenerateRequest {
                    system_prompt,
                    user_message: &job.message_text,
                    context: &prompt_context,
                    max_tokens: settings.max_tokens,
                },
            )
            .await
        {
            Ok(generation) => generation,
            Err(err) => {
                self.record_provider_failure(job, intent, &err, Some(model.model()), started)
                    .await;
                return AutoReplyOutcome::ProviderFailed;
            }
        };

        let decision = escalation::decide(&settings, intent, generation.confidence);
        let outcome = match &decision {
            Decision::Escalate { reason } => {
                info!(tenant_id = %tenant_id, message_id = %job.message_id, reason = %reason, "Escalating to a human");
                AutoReplyOutcome::Escalated
            }
            Decision::Reply => {
                match self
                    .sessions
                    .send_text(tenant_id, &job.chat_jid, &generation.text)
                    .await
                {
                    Ok(_) => {
                        self.send_attachments(job, &knowledge).await;
                        AutoReplyOutcome::Replied
                    }
                    Err(err) => {
                        warn!(tenant_id = %tenant_id, message_id = %job.message_id, error = %err, "Failed to send automated reply");
                        AutoReplyOutcome::SendFailed
                    }
                }
            }
        };

        let action = match outcome {
            AutoReplyOutcome::Replied => "auto_replied",
            AutoReplyOutcome::Escalated => "escalated",
            _ => "failed",
        };
        self.write_log(ConversationLogEntry {
            tenant_id,
            message_id: job.message_id.clone(),
            customer_jid: job.sender_jid.clone(),
            customer_message: job.message_text.clone(),
            ai_response: Some(generation.text.clone()),
            detected_intent: intent.as_str().to_string(),
            confidence: generation.confidence,
            action: action.to_string(),
            escalation_reason: decision.reason().map(str::to_string),
            response_time_ms: elapsed_ms(started),
            input_tokens: generation.input_tokens,
            output_tokens: generation.output_tokens,
            cost_usd: generation.cost_usd,
            model_used: Some(generation.model.clone()),
        })
        .await;

        let used: Vec<Uuid> = knowledge.iter().map(|entry| entry.id).collect();
        if let Err(err) = self.ai.record_knowledge_usage(&used).await {
            warn!(tenant_id = %tenant_id, error = %err, "Failed to record knowledge usage");
        }
        if let Err(err) = self
            .ai
            .record_usage(tenant_id, generation.total_tokens(), generation.cost_usd)
            .await
        {
            warn!(tenant_id = %tenant_id, error = %err, "Failed to record model usage");
        }

        outcome
    }

    async fn build_context(
        &self,
        job: &AutoReplyJob,
        settings: &TenantAiSettings,
        knowledge: &[knowledge_entry::Model],
    ) -> String {
        let history = self
            .messages
            .recent_history(
                job.tenant_id,
                &job.chat_jid,
                &job.message_id,
                self.config.history_limit,
            )
            .await
            .unwrap_or_else(|err| {
                warn!(tenant_id = %job.tenant_id, error = %err, "Failed to load conversation history");
                Vec::new()
            });

        context::assemble(&[
            context::business_block(&settings.business),
            context::history_block(&history, self.config.history_char_budget),
            context::knowledge_block(knowledge),
        ])
    }

    async fn generate(
        &self,
        model: &dyn LanguageModel,
        request: GenerateRequest<'_>,
    ) -> Result<Generation, ProviderError> {
        match tokio::time::timeout(self.config.provider_timeout(), model.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: model.provider().to_string(),
            }),
        }
    }

    async fn record_provider_failure(
        &self,
        job: &AutoReplyJob,
        intent: Intent,
        err: &ProviderError,
        model: Option<&str>,
        started: Instant,
    ) {
        warn!(tenant_id = %job.tenant_id, message_id = %job.message_id, error = %err, "Model request failed");
        self.write_log(ConversationLogEntry {
            tenant_id: job.tenant_id,
            message_id: job.message_id.clone(),
            customer_jid: job.sender_jid.clone(),
            customer_message: job.message_text.clone(),
            ai_response: None,
            detected_intent: intent.as_str().to_string(),
            confidence: 0.0,
            action: "failed".to_string(),
            escalation_reason: Some(format!("Provider error: {}", err)),
            response_time_ms: elapsed_ms(started),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            model_used: model.map(str::to_string),
        })
        .await;
    }

    async fn write_log(&self, entry: ConversationLogEntry) {
        let tenant_id = entry.tenant_id;
        if let Err(err) = self.ai.insert_log(entry).await {
            warn!(tenant_id = %tenant_id, error = %err, "Failed to write conversation log");
        }
    }

    /// Knowledge entries carrying media follow the text reply. Failures
    /// here never undo the reply.
    async fn send_attachments(&self, job: &AutoReplyJob, knowledge: &[knowledge_entry::Model]) {
        for entry in knowledge {
            let Some(url) = entry.media_url.as_deref().filter(|u| !u.is_empty()) else {
                continue;
            };
            let bytes = match self.fetch_attachment(url).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(tenant_id = %job.tenant_id, knowledge_id = %entry.id, url = %url, error = %err, "Failed to load knowledge attachment");
                    continue;
                }
            };
            let kind = entry
                .media_type
                .as_deref()
                .and_then(|raw| MediaKind::parse(raw).ok())
                .unwrap_or(MediaKind::Image);
            let media = OutboundMedia {
                kind,
                bytes,
                file_name: attachment_name(url),
                caption: entry.title.clone(),
            };
            if let Err(err) = self
                .sessions
                .send_media(job.tenant_id, &job.chat_jid, media)
                .await
            {
                warn!(tenant_id = %job.tenant_id, knowledge_id = %entry.id, error = %err, "Failed to send knowledge attachment");
            }
        }
    }

    async fn fetch_attachment(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        if let Some(path) = self.media.resolve_local(url) {
            return Ok(tokio::fs::read(path).await?);
        }
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Stamp the message and count it against the customer aggregate.
    async fn finalize(&self, job: &AutoReplyJob, outcome: AutoReplyOutcome) {
        let tenant_id = job.tenant_id;
        if let Err(err) = self
            .messages
            .mark_processed(tenant_id, &job.message_id, outcome.answered())
            .await
        {
            error!(tenant_id = %tenant_id, message_id = %job.message_id, error = %err, "Failed to mark message processed");
        }

        let (mut customer, created) = match self
            .customers
            .record_message(
                tenant_id,
                &job.sender_jid,
                job.sender_name.as_deref(),
                &job.message_text,
                job.timestamp,
            )
            .await
        {
            Ok(recorded) => recorded,
            Err(err) => {
                error!(tenant_id = %tenant_id, customer_jid = %job.sender_jid, error = %err, "Failed to update customer aggregate");
                return;
            }
        };

        if outcome == AutoReplyOutcome::Escalated {
            match self
                .customers
                .set_needs_attention(tenant_id, &customer.customer_jid, true)
                .await
            {
                Ok(()) => customer.needs_attention = true,
                Err(err) => {
                    warn!(tenant_id = %tenant_id, error = %err, "Failed to flag customer for attention")
                }
            }
        }

        let event = if created {
            HubEvent::NewCustomer
        } else {
            HubEvent::CustomerUpdated
        };
        self.hub.publish(tenant_id, event, customer_payload(&customer));
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

fn attachment_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("attachment")
        .to_string()
}

fn customer_payload(customer: &customer_insight::Model) -> serde_json::Value {
    json!({
        "id": customer.id,
        "customer_jid": customer.customer_jid,
        "customer_phone": customer.customer_phone,
        "customer_name": customer.customer_name,
        "message_count": customer.message_count,
        "last_message_at": customer.last_message_at,
        "last_message_summary": customer.last_message_summary,
        "needs_attention": customer.needs_attention,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_names_come_from_the_url_path() {
        assert_eq!(
            attachment_name("/uploads/t/menu_20250101.jpg"),
            "menu_20250101.jpg"
        );
        assert_eq!(
            attachment_name("https://cdn.example.com/a/price.pdf?sig=1"),
            "price.pdf"
        );
        assert_eq!(attachment_name("https://cdn.example.com/"), "attachment");
    }

    #[test]
    fn only_model_answers_count_as_answered() {
        assert!(AutoReplyOutcome::Replied.answered());
        assert!(AutoReplyOutcome::Escalated.answered());
        assert!(!AutoReplyOutcome::Disabled.answered());
        assert!(!AutoReplyOutcome::ProviderFailed.answered());
    }
}

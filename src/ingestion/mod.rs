//! # Message Ingestion & Identity Resolution
//!
//! Turns network message events into canonical rows, resolves anonymized
//! identities, hands inbound direct messages to the automated-reply lane and
//! notifies dashboards. Every step is a soft failure: errors are logged and
//! the pipeline moves on, relying on network redelivery for recovery.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::DbErr;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::hub::{EventHub, HubEvent};
use crate::jid;
use crate::queue::{self, AutoReplyJob, WorkQueue};
use crate::repositories::message::{MessageKind, NewMessage};
use crate::repositories::{CustomerRepository, IdentityRepository, MessageRepository};
use crate::session::{
    HistoryConversation, InboundMessage, MediaKind, MessageContent, Receipt, SentMessage,
    SessionClient,
};
use crate::telemetry::metric_names;

pub mod media;
pub mod receipts;

pub use media::MediaStore;
pub use receipts::ReceiptCorrelator;

/// History-sync messages older than this are not imported.
const HISTORY_WINDOW_SECONDS: i64 = 300;

/// What happened to one message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored { enqueued: bool },
    Duplicate,
    Failed,
}

/// An outbound message already accepted by the network.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub to: String,
    pub sent: SentMessage,
    pub kind: MessageKind,
    pub text: String,
    pub media_url: Option<String>,
}

pub struct IngestionPipeline {
    messages: MessageRepository,
    identities: IdentityRepository,
    customers: CustomerRepository,
    queue: Arc<dyn WorkQueue>,
    hub: EventHub,
    media: MediaStore,
    correlator: ReceiptCorrelator,
}

impl IngestionPipeline {
    pub fn new(
        messages: MessageRepository,
        identities: IdentityRepository,
        customers: CustomerRepository,
        queue: Arc<dyn WorkQueue>,
        hub: EventHub,
        media: MediaStore,
    ) -> Self {
        Self {
            messages,
            identities,
            customers,
            queue,
            hub,
            media,
            correlator: ReceiptCorrelator::default(),
        }
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    /// Store one message event and fan it out.
    pub async fn ingest_message(
        &self,
        tenant_id: Uuid,
        client: &dyn SessionClient,
        message: InboundMessage,
    ) -> IngestOutcome {
        let kind = message.content.kind();
        let text = message.content.text().to_string();

        let chat_jid = self.resolve_identity(tenant_id, &message.chat_jid).await;
        let customer_jid = if message.is_from_me {
            chat_jid.clone()
        } else {
            self.resolve_identity(tenant_id, &message.sender_jid).await
        };
        let is_group = message.is_group || jid::is_group(&chat_jid);

        let inserted = self
            .messages
            .insert_if_absent(NewMessage {
                tenant_id,
                message_id: message.id.clone(),
                chat_jid: chat_jid.clone(),
                sender_jid: customer_jid.clone(),
                kind,
                text: text.clone(),
                media_url: None,
                is_from_me: message.is_from_me,
                is_group,
                timestamp: message.timestamp,
            })
            .await;

        let inserted = match inserted {
            Ok(inserted) => inserted,
            Err(err) => {
                error!(
                    tenant_id = %tenant_id,
                    message_id = %message.id,
                    error = %err,
                    "Failed to store message"
                );
                return IngestOutcome::Failed;
            }
        };

        let direction = if message.is_from_me { "outbound" } else { "inbound" };
        if !inserted {
            counter!(metric_names::DUPLICATE_MESSAGES, "direction" => direction).increment(1);
            debug!(tenant_id = %tenant_id, message_id = %message.id, "Duplicate message ignored");
            return IngestOutcome::Duplicate;
        }
        counter!(metric_names::INGESTED_MESSAGES, "direction" => direction).increment(1);

        // Only the event that created the row downloads, so replays leave no
        // orphaned files behind.
        let media_url = if message.is_from_me {
            None
        } else {
            self.attach_media(tenant_id, client, &message.id, &message.content)
                .await
        };

        let mut enqueued = false;
        if !message.is_from_me && !is_group {
            let job = AutoReplyJob {
                tenant_id,
                message_id: message.id.clone(),
                sender_jid: customer_jid.clone(),
                chat_jid: chat_jid.clone(),
                sender_name: message.sender_name.clone(),
                message_text: text.clone(),
                timestamp: message.timestamp,
            };
            match queue::enqueue(self.queue.as_ref(), &job).await {
                Ok(()) => enqueued = true,
                Err(err) => error!(
                    tenant_id = %tenant_id,
                    message_id = %message.id,
                    error = %err,
                    "Failed to enqueue message for automated reply"
                ),
            }
        }

        self.publish_message(
            tenant_id,
            &message.id,
            &customer_jid,
            &chat_jid,
            kind,
            &text,
            media_url.as_deref(),
            message.timestamp,
            message.is_from_me,
        );

        IngestOutcome::Stored { enqueued }
    }

    /// Import the recent tail of a history-sync batch. No automated replies.
    pub async fn ingest_history(
        &self,
        tenant_id: Uuid,
        conversations: Vec<HistoryConversation>,
    ) -> usize {
        let cutoff = Utc::now() - Duration::seconds(HISTORY_WINDOW_SECONDS);
        let mut stored = 0;

        for conversation in conversations {
            let chat_jid = jid::normalize(&conversation.chat_jid);
            let is_group = jid::is_group(&chat_jid);

            for message in conversation.messages {
                if message.timestamp < cutoff {
                    continue;
                }
                let kind = message.content.kind();
                let text = message.content.text().to_string();
                if kind == MessageKind::Text && text.is_empty() {
                    continue;
                }

                let result = self
                    .messages
                    .insert_if_absent(NewMessage {
                        tenant_id,
                        message_id: message.id.clone(),
                        chat_jid: chat_jid.clone(),
                        sender_jid: chat_jid.clone(),
                        kind,
                        text: text.clone(),
                        media_url: None,
                        is_from_me: message.is_from_me,
                        is_group,
                        timestamp: message.timestamp,
                    })
                    .await;

                match result {
                    Ok(true) => {
                        stored += 1;
                        self.publish_message(
                            tenant_id,
                            &message.id,
                            &chat_jid,
                            &chat_jid,
                            kind,
                            &text,
                            None,
                            message.timestamp,
                            message.is_from_me,
                        );
                    }
                    Ok(false) => {}
                    Err(err) => warn!(
                        tenant_id = %tenant_id,
                        message_id = %message.id,
                        error = %err,
                        "Failed to store history message"
                    ),
                }
            }
        }

        if stored > 0 {
            info!(tenant_id = %tenant_id, stored, "History sync imported");
        }
        stored
    }

    /// Correlate a receipt with earlier sightings of the same message ids.
    pub async fn handle_receipt(&self, tenant_id: Uuid, receipt: Receipt) {
        for message_id in &receipt.message_ids {
            let Some((lid, phone)) =
                self.correlator
                    .observe(tenant_id, message_id, &receipt.chat_jid)
            else {
                continue;
            };
            if let Err(err) = self.apply_alias(tenant_id, &lid, &phone).await {
                warn!(
                    tenant_id = %tenant_id,
                    lid = %lid,
                    phone = %phone,
                    error = %err,
                    "Failed to apply identity alias"
                );
            }
        }
    }

    /// Persist an alias and rewrite stored references to the anonymized form.
    ///
    /// Returns the number of message rows rewritten.
    pub async fn apply_alias(
        &self,
        tenant_id: Uuid,
        lid_jid: &str,
        phone_jid: &str,
    ) -> Result<u64, DbErr> {
        let lid_jid = jid::normalize(lid_jid);
        let phone_jid = jid::phone_jid(&jid::phone_number(phone_jid));

        self.identities
            .upsert_mapping(tenant_id, &lid_jid, &phone_jid)
            .await?;
        let rewritten = self
            .messages
            .rewrite_identity(tenant_id, &lid_jid, &phone_jid)
            .await?;
        self.customers
            .rewrite_identity(tenant_id, &lid_jid, &phone_jid)
            .await?;

        info!(tenant_id = %tenant_id, lid = %lid_jid, phone = %phone_jid, rewritten, "Stored identity alias");
        if rewritten > 0 {
            self.hub.publish(
                tenant_id,
                HubEvent::NewMessage,
                json!({
                    "type": "jid_mapping",
                    "old_jid": lid_jid,
                    "new_jid": phone_jid,
                    "message_text": "",
                }),
            );
        }
        Ok(rewritten)
    }

    /// Record a message the gateway just sent.
    pub async fn record_outbound(&self, tenant_id: Uuid, record: OutboundRecord) {
        let to = jid::normalize(&record.to);
        self.correlator
            .remember(tenant_id, &record.sent.message_id, &to);

        let row = NewMessage {
            tenant_id,
            message_id: record.sent.message_id.clone(),
            chat_jid: to.clone(),
            sender_jid: to.clone(),
            kind: record.kind,
            text: record.text.clone(),
            media_url: record.media_url.clone(),
            is_from_me: true,
            is_group: jid::is_group(&to),
            timestamp: record.sent.timestamp,
        };
        let stored = if record.media_url.is_some() {
            self.messages.upsert_with_media(row).await
        } else {
            self.messages.insert_if_absent(row).await.map(|_| ())
        };
        if let Err(err) = stored {
            // The network already accepted the message; keep going.
            error!(
                tenant_id = %tenant_id,
                message_id = %record.sent.message_id,
                error = %err,
                "Failed to store sent message"
            );
        }

        self.publish_message(
            tenant_id,
            &record.sent.message_id,
            &to,
            &to,
            record.kind,
            &record.text,
            record.media_url.as_deref(),
            record.sent.timestamp,
            true,
        );
    }

    pub async fn clear_conversation(&self, tenant_id: Uuid, chat_jid: &str) -> Result<u64, DbErr> {
        let chat_jid = jid::normalize(chat_jid);
        let deleted = self
            .messages
            .delete_conversation(tenant_id, &chat_jid)
            .await?;
        info!(tenant_id = %tenant_id, chat_jid = %chat_jid, deleted, "Conversation cleared");
        Ok(deleted)
    }

    /// Normalized identity, mapped to its phone form when an alias is known.
    pub async fn resolve_identity(&self, tenant_id: Uuid, raw: &str) -> String {
        let normalized = jid::normalize(raw);
        if !jid::is_anonymized(&normalized) {
            return normalized;
        }
        match self.identities.resolve(tenant_id, &normalized).await {
            Ok(Some(phone)) => phone,
            Ok(None) => normalized,
            Err(err) => {
                warn!(tenant_id = %tenant_id, jid = %normalized, error = %err, "Alias lookup failed");
                normalized
            }
        }
    }

    /// Download the attachment of a freshly stored message and point the row
    /// at the local copy.
    async fn attach_media(
        &self,
        tenant_id: Uuid,
        client: &dyn SessionClient,
        message_id: &str,
        content: &MessageContent,
    ) -> Option<String> {
        let (kind, media, file_name) = match content {
            MessageContent::Image { media, .. } => (MediaKind::Image, media, None),
            MessageContent::Document {
                media, file_name, ..
            } => (MediaKind::Document, media, file_name.as_deref()),
            _ => return None,
        };

        let bytes = match client.download(media).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "Failed to download media");
                return None;
            }
        };
        let url = match self
            .media
            .store_received(tenant_id, message_id, kind, file_name, &bytes, Utc::now())
            .await
        {
            Ok(url) => url,
            Err(err) => {
                warn!(tenant_id = %tenant_id, error = %err, "Failed to store media");
                return None;
            }
        };

        if let Err(err) = self
            .messages
            .set_media_url(tenant_id, message_id, &url)
            .await
        {
            warn!(tenant_id = %tenant_id, message_id = %message_id, error = %err, "Failed to record media location");
        }
        Some(url)
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_message(
        &self,
        tenant_id: Uuid,
        message_id: &str,
        sender_jid: &str,
        chat_jid: &str,
        kind: MessageKind,
        text: &str,
        media_url: Option<&str>,
        timestamp: DateTime<Utc>,
        is_from_me: bool,
    ) {
        self.hub.publish(
            tenant_id,
            HubEvent::NewMessage,
            json!({
                "message_id": message_id,
                "sender_jid": sender_jid,
                "chat_jid": chat_jid,
                "message_text": text,
                "message_type": kind.as_str(),
                "media_url": media_url,
                "timestamp": timestamp.timestamp(),
                "is_from_me": is_from_me,
            }),
        );
    }
}

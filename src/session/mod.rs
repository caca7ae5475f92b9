//! # Network Sessions
//!
//! Per-tenant sessions to the messaging network. The wire protocol lives in
//! an external client behind [`SessionClient`]; this module owns lifecycle,
//! event dispatch and durable status.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SessionError;
use crate::repositories::message::MessageKind;

pub mod bridge;
mod manager;
pub mod reconnect;

pub use manager::{ConnectionManager, SessionStatus, StatusSource};

/// Channel a session client pushes its network events into.
pub type EventSink = mpsc::UnboundedSender<NetworkEvent>;

/// Result of driving a session to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectOutcome {
    Connected { jid: Option<String> },
    /// The device is not linked yet; the operator enters `code` on the phone.
    PairingRequired { code: String },
}

/// Opaque handle the client needs to fetch media bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub handle: String,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        caption: String,
        media: MediaRef,
    },
    Video {
        #[serde(default)]
        caption: String,
        #[serde(default)]
        media: Option<MediaRef>,
    },
    Document {
        #[serde(default)]
        caption: String,
        #[serde(default)]
        file_name: Option<String>,
        media: MediaRef,
    },
    /// Stickers, reactions and other kinds stored as empty text.
    #[serde(other)]
    Other,
}

impl MessageContent {
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageContent::Text { .. } | MessageContent::Other => MessageKind::Text,
            MessageContent::Image { .. } => MessageKind::Image,
            MessageContent::Video { .. } => MessageKind::Video,
            MessageContent::Document { .. } => MessageKind::Document,
        }
    }

    /// Display text: the body of a text message or the caption of media.
    pub fn text(&self) -> &str {
        match self {
            MessageContent::Text { text } => text,
            MessageContent::Image { caption, .. }
            | MessageContent::Video { caption, .. }
            | MessageContent::Document { caption, .. } => caption,
            MessageContent::Other => "",
        }
    }
}

/// A message observed on the network, inbound or echoed outbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub is_from_me: bool,
    #[serde(default)]
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    #[serde(default)]
    pub is_from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConversation {
    pub chat_jid: String,
    pub messages: Vec<HistoryMessage>,
}

/// Delivery or read receipt for one or more messages of a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub chat_jid: String,
    #[serde(default)]
    pub sender_jid: Option<String>,
    pub message_ids: Vec<String>,
    #[serde(default)]
    pub receipt_type: Option<String>,
}

/// Every event a session can report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkEvent {
    Message(InboundMessage),
    Connected {
        #[serde(default)]
        jid: Option<String>,
        #[serde(default)]
        push_name: Option<String>,
    },
    Disconnected,
    LoggedOut,
    PairSuccess {
        jid: String,
        #[serde(default)]
        platform: Option<String>,
        #[serde(default)]
        push_name: Option<String>,
    },
    HistorySync {
        conversations: Vec<HistoryConversation>,
    },
    Receipt(Receipt),
}

impl NetworkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NetworkEvent::Message(_) => "message",
            NetworkEvent::Connected { .. } => "connected",
            NetworkEvent::Disconnected => "disconnected",
            NetworkEvent::LoggedOut => "logged_out",
            NetworkEvent::PairSuccess { .. } => "pair_success",
            NetworkEvent::HistorySync { .. } => "history_sync",
            NetworkEvent::Receipt(_) => "receipt",
        }
    }
}

/// Media kinds that can be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Document,
}

impl MediaKind {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "image" => Ok(MediaKind::Image),
            "document" => Ok(MediaKind::Document),
            other => Err(SessionError::UnsupportedMedia(other.to_string())),
        }
    }

    pub fn message_kind(&self) -> MessageKind {
        match self {
            MediaKind::Image => MessageKind::Image,
            MediaKind::Document => MessageKind::Document,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Document => "document",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundMedia {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub caption: String,
}

/// Network acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

/// One live session to the network.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn connect(&self) -> Result<ConnectOutcome, SessionError>;
    async fn disconnect(&self) -> Result<(), SessionError>;
    /// Unlink the device; stored credentials become invalid.
    async fn logout(&self) -> Result<(), SessionError>;
    async fn is_connected(&self) -> bool;
    /// Network identity of the linked device, once paired.
    async fn own_jid(&self) -> Option<String>;
    async fn send_text(&self, to: &str, text: &str) -> Result<SentMessage, SessionError>;
    async fn send_media(
        &self,
        to: &str,
        media: &OutboundMedia,
    ) -> Result<SentMessage, SessionError>;
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, SessionError>;
}

/// Creates session clients bound to a tenant's credential store.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(
        &self,
        tenant_id: Uuid,
        store_path: PathBuf,
        events: EventSink,
    ) -> Result<Arc<dyn SessionClient>, SessionError>;
}

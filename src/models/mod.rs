//! # Data Models
//!
//! SeaORM entities for every table the gateway reads or writes.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod ai_config;
pub mod ai_conversation_log;
pub mod broadcast;
pub mod broadcast_recipient;
pub mod conversation_message;
pub mod customer_insight;
pub mod jid_mapping;
pub mod knowledge_entry;
pub mod queue_item;
pub mod tenant;
pub mod whatsapp_device;

pub use ai_config::Entity as AiConfig;
pub use ai_conversation_log::Entity as AiConversationLog;
pub use broadcast::Entity as Broadcast;
pub use broadcast_recipient::Entity as BroadcastRecipient;
pub use conversation_message::Entity as ConversationMessage;
pub use customer_insight::Entity as CustomerInsight;
pub use jid_mapping::Entity as JidMapping;
pub use knowledge_entry::Entity as KnowledgeEntry;
pub use queue_item::Entity as QueueItem;
pub use tenant::Entity as Tenant;
pub use whatsapp_device::Entity as WhatsappDevice;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "tenant-gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

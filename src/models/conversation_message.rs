//! Conversation message entity
//!
//! Canonical record of one inbound or outbound message. The pair
//! (tenant_id, message_id) is unique so replays from the network collapse
//! into a single row.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "whatsapp_messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Network-assigned message id
    pub message_id: String,
    pub chat_jid: String,
    /// Resolved customer identity (normalized, device suffix stripped)
    pub sender_jid: String,
    /// One of `text`, `image`, `video`, `document`
    pub message_type: String,
    pub message_text: String,
    /// Local `/uploads/...` reference, never a network CDN url
    pub media_url: Option<String>,
    pub is_from_me: bool,
    pub is_group: bool,
    pub timestamp: DateTimeWithTimeZone,
    pub ai_processed: bool,
    pub ai_processed_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

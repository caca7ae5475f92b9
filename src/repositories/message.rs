//! # Conversation Message Repository
//!
//! Idempotent persistence of canonical messages keyed on
//! (tenant_id, message_id), plus the history window used for reply context.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::db::to_db_time;
use crate::models::conversation_message::{self, ActiveModel, Column, Entity, Model};

/// Message content kinds stored in `message_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Document,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
        }
    }
}

/// A message ready to be stored.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: Uuid,
    pub message_id: String,
    pub chat_jid: String,
    pub sender_jid: String,
    pub kind: MessageKind,
    pub text: String,
    pub media_url: Option<String>,
    pub is_from_me: bool,
    pub is_group: bool,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    fn into_active_model(self, now: DateTime<Utc>) -> ActiveModel {
        ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(self.tenant_id),
            message_id: Set(self.message_id),
            chat_jid: Set(self.chat_jid),
            sender_jid: Set(self.sender_jid),
            message_type: Set(self.kind.as_str().to_string()),
            message_text: Set(self.text),
            media_url: Set(self.media_url),
            is_from_me: Set(self.is_from_me),
            is_group: Set(self.is_group),
            timestamp: Set(to_db_time(self.timestamp)),
            ai_processed: Set(false),
            ai_processed_at: Set(None),
            created_at: Set(to_db_time(now)),
        }
    }
}

/// Repository for conversation messages
#[derive(Debug, Clone)]
pub struct MessageRepository {
    db: Arc<DatabaseConnection>,
}

impl MessageRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert the message unless (tenant, message id) already exists.
    ///
    /// Returns `true` only when a new row was written, so replays from the
    /// network are observable no-ops.
    pub async fn insert_if_absent(&self, message: NewMessage) -> Result<bool, DbErr> {
        let active = message.into_active_model(Utc::now());
        let rows = Entity::insert(active)
            .on_conflict(
                OnConflict::columns([Column::TenantId, Column::MessageId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(rows > 0)
    }

    /// Insert the message, or refresh its media reference when it already exists.
    pub async fn upsert_with_media(&self, message: NewMessage) -> Result<(), DbErr> {
        let active = message.into_active_model(Utc::now());
        Entity::insert(active)
            .on_conflict(
                OnConflict::columns([Column::TenantId, Column::MessageId])
                    .update_column(Column::MediaUrl)
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Point a stored message at its local media copy.
    pub async fn set_media_url(
        &self,
        tenant_id: Uuid,
        message_id: &str,
        media_url: &str,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::MediaUrl, Expr::value(media_url))
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::MessageId.eq(message_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn find(&self, tenant_id: Uuid, message_id: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::MessageId.eq(message_id))
            .one(self.db.as_ref())
            .await
    }

    pub async fn count_for_tenant(&self, tenant_id: Uuid) -> Result<u64, DbErr> {
        use sea_orm::PaginatorTrait;
        Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .count(self.db.as_ref())
            .await
    }

    /// Stamp the message as handled by the automated-reply worker.
    ///
    /// `answered` is false when the worker finished without a model reply.
    pub async fn mark_processed(
        &self,
        tenant_id: Uuid,
        message_id: &str,
        answered: bool,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::AiProcessed, Expr::value(answered))
            .col_expr(Column::AiProcessedAt, Expr::value(to_db_time(Utc::now())))
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::MessageId.eq(message_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Most recent `limit` text turns of a conversation, oldest first,
    /// excluding the message currently being answered.
    pub async fn recent_history(
        &self,
        tenant_id: Uuid,
        chat_jid: &str,
        exclude_message_id: &str,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        let mut rows = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::ChatJid.eq(chat_jid))
            .filter(Column::MessageId.ne(exclude_message_id))
            .filter(Column::MessageText.ne(""))
            .order_by_desc(Column::Timestamp)
            .limit(limit)
            .all(self.db.as_ref())
            .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Rewrite every stored reference to an anonymized identity with its
    /// phone identity. Returns the number of rows changed.
    pub async fn rewrite_identity(
        &self,
        tenant_id: Uuid,
        anonymized: &str,
        phone: &str,
    ) -> Result<u64, DbErr> {
        let chats = Entity::update_many()
            .col_expr(Column::ChatJid, Expr::value(phone))
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::ChatJid.eq(anonymized))
            .exec(self.db.as_ref())
            .await?;
        let senders = Entity::update_many()
            .col_expr(Column::SenderJid, Expr::value(phone))
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::SenderJid.eq(anonymized))
            .exec(self.db.as_ref())
            .await?;
        Ok(chats.rows_affected + senders.rows_affected)
    }

    /// Delete every stored message of one conversation.
    pub async fn delete_conversation(&self, tenant_id: Uuid, jid: &str) -> Result<u64, DbErr> {
        let result = Entity::delete_many()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(
                Condition::any()
                    .add(conversation_message::Column::ChatJid.eq(jid))
                    .add(conversation_message::Column::SenderJid.eq(jid)),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }
}

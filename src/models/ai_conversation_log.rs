//! Append-only log of automated-reply outcomes.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ai_conversation_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub message_id: String,
    pub customer_jid: String,
    pub customer_message: String,
    pub ai_response: Option<String>,
    pub detected_intent: String,
    pub confidence_score: f64,
    /// `auto_replied`, `escalated` or `failed`
    pub action_taken: String,
    pub escalation_reason: Option<String>,
    pub response_time_ms: i64,
    pub tokens_used: i32,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cost_usd: f64,
    pub model_used: Option<String>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

//! # Automated-Reply Repository
//!
//! Tenant AI configuration, knowledge entries, usage accounting and the
//! conversation log written once per processed message.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use uuid::Uuid;

use crate::db::to_db_time;
use crate::models::{ai_config, ai_conversation_log, knowledge_entry};

/// Effective AI settings for a tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantAiSettings {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub use_system_key: bool,
    /// Stored credential, possibly sealed.
    pub user_api_key: Option<String>,
    pub confidence_threshold: f64,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub business: BusinessProfile,
    pub escalate_complaint: bool,
    pub escalate_order: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusinessProfile {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub hours: Option<String>,
    pub payment_methods: Option<String>,
}

impl Default for TenantAiSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            use_system_key: true,
            user_api_key: None,
            confidence_threshold: 0.80,
            max_tokens: 200,
            system_prompt: None,
            business: BusinessProfile::default(),
            escalate_complaint: true,
            escalate_order: false,
        }
    }
}

impl From<ai_config::Model> for TenantAiSettings {
    fn from(row: ai_config::Model) -> Self {
        Self {
            enabled: row.enabled,
            provider: row.ai_provider,
            model: row.model,
            use_system_key: row.use_system_key,
            user_api_key: row.user_api_key.filter(|k| !k.trim().is_empty()),
            confidence_threshold: row.confidence_threshold,
            max_tokens: u32::try_from(row.max_tokens).unwrap_or(200),
            system_prompt: row.system_prompt.filter(|p| !p.trim().is_empty()),
            business: BusinessProfile {
                name: row.business_name,
                kind: row.business_type,
                description: row.business_description,
                address: row.business_address,
                hours: row.business_hours,
                payment_methods: row.payment_methods,
            },
            escalate_complaint: row.escalate_complaint,
            escalate_order: row.escalate_order,
        }
    }
}

/// One conversation-log row.
#[derive(Debug, Clone)]
pub struct ConversationLogEntry {
    pub tenant_id: Uuid,
    pub message_id: String,
    pub customer_jid: String,
    pub customer_message: String,
    pub ai_response: Option<String>,
    pub detected_intent: String,
    pub confidence: f64,
    pub action: String,
    pub escalation_reason: Option<String>,
    pub response_time_ms: i64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub model_used: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AiRepository {
    db: Arc<DatabaseConnection>,
}

impl AiRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Tenant settings, or defaults (auto-reply disabled) when none are stored.
    pub async fn load_settings(&self, tenant_id: Uuid) -> Result<TenantAiSettings, DbErr> {
        let row = ai_config::Entity::find()
            .filter(ai_config::Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await?;
        Ok(row.map(TenantAiSettings::from).unwrap_or_default())
    }

    /// Highest-priority active knowledge entries.
    pub async fn active_knowledge(
        &self,
        tenant_id: Uuid,
        limit: u64,
    ) -> Result<Vec<knowledge_entry::Model>, DbErr> {
        knowledge_entry::Entity::find()
            .filter(knowledge_entry::Column::TenantId.eq(tenant_id))
            .filter(knowledge_entry::Column::IsActive.eq(true))
            .order_by_desc(knowledge_entry::Column::Priority)
            .order_by_asc(knowledge_entry::Column::CreatedAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }

    pub async fn record_knowledge_usage(&self, ids: &[Uuid]) -> Result<(), DbErr> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = to_db_time(Utc::now());
        knowledge_entry::Entity::update_many()
            .col_expr(
                knowledge_entry::Column::UsageCount,
                Expr::col(knowledge_entry::Column::UsageCount).add(1),
            )
            .col_expr(knowledge_entry::Column::LastUsedAt, Expr::value(now))
            .filter(knowledge_entry::Column::Id.is_in(ids.iter().copied()))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Add one request's tokens and cost to the tenant totals.
    pub async fn record_usage(
        &self,
        tenant_id: Uuid,
        tokens: u32,
        cost_usd: f64,
    ) -> Result<(), DbErr> {
        ai_config::Entity::update_many()
            .col_expr(
                ai_config::Column::TotalRequests,
                Expr::col(ai_config::Column::TotalRequests).add(1),
            )
            .col_expr(
                ai_config::Column::TotalTokensUsed,
                Expr::col(ai_config::Column::TotalTokensUsed).add(i64::from(tokens)),
            )
            .col_expr(
                ai_config::Column::TotalCostUsd,
                Expr::col(ai_config::Column::TotalCostUsd).add(cost_usd),
            )
            .col_expr(
                ai_config::Column::UpdatedAt,
                Expr::value(to_db_time(Utc::now())),
            )
            .filter(ai_config::Column::TenantId.eq(tenant_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn insert_log(&self, entry: ConversationLogEntry) -> Result<(), DbErr> {
        let input_tokens = i32::try_from(entry.input_tokens).unwrap_or(i32::MAX);
        let output_tokens = i32::try_from(entry.output_tokens).unwrap_or(i32::MAX);
        let active = ai_conversation_log::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(entry.tenant_id),
            message_id: Set(entry.message_id),
            customer_jid: Set(entry.customer_jid),
            customer_message: Set(entry.customer_message),
            ai_response: Set(entry.ai_response),
            detected_intent: Set(entry.detected_intent),
            confidence_score: Set(entry.confidence),
            action_taken: Set(entry.action),
            escalation_reason: Set(entry.escalation_reason),
            response_time_ms: Set(entry.response_time_ms),
            tokens_used: Set(input_tokens.saturating_add(output_tokens)),
            input_tokens: Set(input_tokens),
            output_tokens: Set(output_tokens),
            cost_usd: Set(entry.cost_usd),
            model_used: Set(entry.model_used),
            created_at: Set(to_db_time(Utc::now())),
        };
        ai_conversation_log::Entity::insert(active)
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn logs_for_message(
        &self,
        tenant_id: Uuid,
        message_id: &str,
    ) -> Result<Vec<ai_conversation_log::Model>, DbErr> {
        ai_conversation_log::Entity::find()
            .filter(ai_conversation_log::Column::TenantId.eq(tenant_id))
            .filter(ai_conversation_log::Column::MessageId.eq(message_id))
            .all(self.db.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_auto_reply() {
        let settings = TenantAiSettings::default();
        assert!(!settings.enabled);
        assert_eq!(settings.provider, "gemini");
        assert_eq!(settings.model, "gemini-1.5-flash");
        assert!(settings.use_system_key);
        assert!((settings.confidence_threshold - 0.80).abs() < f64::EPSILON);
        assert!(settings.escalate_complaint);
        assert!(!settings.escalate_order);
    }
}

//! Per-tenant automated-reply configuration.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ai_configs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub tenant_id: Uuid,
    pub enabled: bool,
    pub ai_provider: String,
    pub model: String,
    /// When true the tenant's own credential is ignored
    pub use_system_key: bool,
    /// Sealed with the gateway crypto key, see `crypto::seal_credential`
    pub user_api_key: Option<String>,
    pub confidence_threshold: f64,
    pub max_tokens: i32,
    pub system_prompt: Option<String>,
    pub business_name: Option<String>,
    pub business_type: Option<String>,
    pub business_hours: Option<String>,
    pub business_description: Option<String>,
    pub business_address: Option<String>,
    pub payment_methods: Option<String>,
    pub escalate_complaint: bool,
    pub escalate_order: bool,
    pub total_requests: i64,
    pub total_tokens_used: i64,
    pub total_cost_usd: f64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

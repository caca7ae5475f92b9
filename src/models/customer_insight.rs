//! Customer aggregate entity
//!
//! Running counters per (tenant, resolved identity). Upserted on every
//! inbound message and never deleted by the gateway.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "customer_insights")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_jid: String,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
    pub message_count: i32,
    pub first_message_at: Option<DateTimeWithTimeZone>,
    pub last_message_at: Option<DateTimeWithTimeZone>,
    pub last_message_summary: Option<String>,
    /// Set when an automated reply was escalated to a human
    pub needs_attention: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

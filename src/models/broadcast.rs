//! Broadcast campaign entity
//!
//! Status moves `draft -> scheduled/active -> sending -> completed`, or to
//! `cancelled` from any pre-terminal state. Only `draft`, `scheduled` and
//! `active` rows are eligible for execution.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "broadcasts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Template with optional `{{nama}}` / `{{name}}` placeholders
    pub message_content: String,
    pub status: String,
    /// Next due time for both one-off and recurring campaigns
    pub scheduled_at: Option<DateTimeWithTimeZone>,
    pub is_recurring: bool,
    pub recurrence_type: Option<String>,
    pub recurrence_interval: Option<i32>,
    /// JSON array of weekday names for weekly rules
    pub recurrence_days: Option<Json>,
    /// `HH:MM`
    pub recurrence_time: Option<String>,
    pub recurrence_end_date: Option<DateTimeWithTimeZone>,
    pub recurrence_count: Option<i32>,
    pub execution_count: i32,
    pub last_executed_at: Option<DateTimeWithTimeZone>,
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub delivered_count: i32,
    pub failed_count: i32,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::broadcast_recipient::Entity")]
    Recipients,
}

impl Related<super::broadcast_recipient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Recipients.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

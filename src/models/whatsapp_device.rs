//! Durable session status per tenant.
//!
//! One row per tenant. It survives restarts and seeds the startup reconnect
//! sweep; the live session itself is never stored here.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "whatsapp_devices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub tenant_id: Uuid,
    /// Last-known network identity of the paired device
    pub jid: Option<String>,
    pub is_connected: bool,
    pub last_connected_at: Option<DateTimeWithTimeZone>,
    pub platform: String,
    pub push_name: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

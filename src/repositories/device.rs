//! # Device Repository
//!
//! Durable per-tenant session status. This row outlives the in-memory
//! session and seeds both status fallbacks and the startup reconnect sweep.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::db::to_db_time;
use crate::models::whatsapp_device::{ActiveModel, Column, Entity, Model};

/// Status fields written when a session connects or pairs.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    pub jid: Option<String>,
    pub is_connected: bool,
    pub platform: Option<String>,
    pub push_name: Option<String>,
}

/// Repository for durable device status
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    db: Arc<DatabaseConnection>,
}

impl DeviceRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Insert or update the tenant's device row.
    ///
    /// A `None` jid, platform or push name keeps whatever was recorded before.
    pub async fn upsert_status(&self, tenant_id: Uuid, status: DeviceStatus) -> Result<(), DbErr> {
        let now = to_db_time(Utc::now());
        let last_connected_at = status.is_connected.then_some(now);

        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            jid: Set(status.jid.clone()),
            is_connected: Set(status.is_connected),
            last_connected_at: Set(last_connected_at),
            platform: Set(status.platform.clone().unwrap_or_else(|| "web".to_string())),
            push_name: Set(status.push_name.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let mut on_conflict = OnConflict::column(Column::TenantId);
        on_conflict.update_columns([Column::IsConnected, Column::UpdatedAt]);
        if status.jid.is_some() {
            on_conflict.update_column(Column::Jid);
        }
        if status.is_connected {
            on_conflict.update_column(Column::LastConnectedAt);
        }
        if status.platform.is_some() {
            on_conflict.update_column(Column::Platform);
        }
        if status.push_name.is_some() {
            on_conflict.update_column(Column::PushName);
        }

        Entity::insert(active)
            .on_conflict(on_conflict.to_owned())
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Downgrade durable status to disconnected. No-op when no row exists.
    pub async fn mark_disconnected(&self, tenant_id: Uuid) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::IsConnected, Expr::value(false))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(Utc::now())))
            .filter(Column::TenantId.eq(tenant_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn find(&self, tenant_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .one(self.db.as_ref())
            .await
    }

    /// Devices last recorded as connected with a known network identity.
    pub async fn connected_devices(&self) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::IsConnected.eq(true))
            .filter(Column::Jid.is_not_null())
            .filter(Column::Jid.ne(""))
            .all(self.db.as_ref())
            .await
    }
}

//! Identity alias persistence (anonymized identity to phone identity).

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::db::to_db_time;
use crate::jid;
use crate::models::jid_mapping::{ActiveModel, Column, Entity};

#[derive(Debug, Clone)]
pub struct IdentityRepository {
    db: Arc<DatabaseConnection>,
}

impl IdentityRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record that `lid_jid` and `phone_jid` are the same person for a tenant.
    /// A later pairing for the same anonymized identity replaces the phone side.
    pub async fn upsert_mapping(
        &self,
        tenant_id: Uuid,
        lid_jid: &str,
        phone_jid: &str,
    ) -> Result<(), DbErr> {
        let now = to_db_time(Utc::now());
        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            lid_jid: Set(lid_jid.to_string()),
            phone_jid: Set(phone_jid.to_string()),
            phone_number: Set(jid::phone_number(phone_jid)),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Entity::insert(active)
            .on_conflict(
                OnConflict::columns([Column::TenantId, Column::LidJid])
                    .update_columns([Column::PhoneJid, Column::PhoneNumber, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Phone identity for an anonymized one, if known.
    pub async fn resolve(&self, tenant_id: Uuid, lid_jid: &str) -> Result<Option<String>, DbErr> {
        let mapping = Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::LidJid.eq(lid_jid))
            .one(self.db.as_ref())
            .await?;
        Ok(mapping.map(|m| m.phone_jid))
    }
}

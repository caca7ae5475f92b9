//! # Customer Aggregate Repository
//!
//! Running per-customer counters keyed on (tenant_id, customer_jid).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::db::to_db_time;
use crate::jid;
use crate::models::customer_insight::{ActiveModel, Column, Entity, Model};

const SUMMARY_LIMIT: usize = 200;

/// Truncate a message body to the stored summary length.
pub fn summarize(text: &str) -> String {
    if text.chars().count() <= SUMMARY_LIMIT {
        return text.to_string();
    }
    let mut summary: String = text.chars().take(SUMMARY_LIMIT).collect();
    summary.push_str("...");
    summary
}

#[derive(Debug, Clone)]
pub struct CustomerRepository {
    db: Arc<DatabaseConnection>,
}

impl CustomerRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Count one inbound message against the customer aggregate.
    ///
    /// Returns the updated row and whether it was created by this call.
    /// An already known display name is never overwritten.
    pub async fn record_message(
        &self,
        tenant_id: Uuid,
        customer_jid: &str,
        display_name: Option<&str>,
        text: &str,
        at: DateTime<Utc>,
    ) -> Result<(Model, bool), DbErr> {
        let customer_jid = jid::normalize(customer_jid);
        let existed = self.find(tenant_id, &customer_jid).await?.is_some();

        let now = to_db_time(Utc::now());
        let at = to_db_time(at);
        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            customer_jid: Set(customer_jid.clone()),
            customer_phone: Set(Some(jid::phone_number(&customer_jid))),
            customer_name: Set(name),
            message_count: Set(1),
            first_message_at: Set(Some(at)),
            last_message_at: Set(Some(at)),
            last_message_summary: Set(Some(summarize(text))),
            needs_attention: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Entity::insert(active)
            .on_conflict(
                OnConflict::columns([Column::TenantId, Column::CustomerJid])
                    .value(
                        Column::MessageCount,
                        Expr::col((Entity, Column::MessageCount)).add(1),
                    )
                    .value(
                        Column::CustomerName,
                        Expr::cust(
                            "COALESCE(customer_insights.customer_name, excluded.customer_name)",
                        ),
                    )
                    .update_columns([
                        Column::LastMessageAt,
                        Column::LastMessageSummary,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        let model = self
            .find(tenant_id, &customer_jid)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("customer {}", customer_jid)))?;
        Ok((model, !existed))
    }

    /// Flag or clear the "needs human attention" state of a conversation.
    pub async fn set_needs_attention(
        &self,
        tenant_id: Uuid,
        customer_jid: &str,
        needs_attention: bool,
    ) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::NeedsAttention, Expr::value(needs_attention))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(Utc::now())))
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::CustomerJid.eq(jid::normalize(customer_jid)))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Move an aggregate from an anonymized identity to its phone identity,
    /// unless the phone identity already has its own row.
    pub async fn rewrite_identity(
        &self,
        tenant_id: Uuid,
        anonymized: &str,
        phone: &str,
    ) -> Result<u64, DbErr> {
        if self.find(tenant_id, phone).await?.is_some() {
            return Ok(0);
        }
        let result = Entity::update_many()
            .col_expr(Column::CustomerJid, Expr::value(phone))
            .col_expr(Column::CustomerPhone, Expr::value(jid::phone_number(phone)))
            .col_expr(Column::UpdatedAt, Expr::value(to_db_time(Utc::now())))
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::CustomerJid.eq(anonymized))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn find(&self, tenant_id: Uuid, customer_jid: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::CustomerJid.eq(customer_jid))
            .one(self.db.as_ref())
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(self.db.as_ref()).await
    }
}

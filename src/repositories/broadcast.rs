//! # Broadcast Repository
//!
//! Campaign and recipient persistence. Every state transition is a guarded
//! `UPDATE ... WHERE status IN (..)` so that concurrent scheduler passes and a
//! restarted delivery worker observe each transition at most once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use crate::broadcast::recurrence::RecurrenceRule;
use crate::db::to_db_time;
use crate::error::RecurrenceError;
use crate::jid;
use crate::models::{broadcast, broadcast_recipient, customer_insight};

pub mod status {
    pub const DRAFT: &str = "draft";
    pub const SCHEDULED: &str = "scheduled";
    pub const ACTIVE: &str = "active";
    pub const SENDING: &str = "sending";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";

    /// Campaign states the scheduler may claim.
    pub const CLAIMABLE: [&str; 2] = [SCHEDULED, ACTIVE];
    /// Campaign states that may still be cancelled.
    pub const PRE_TERMINAL: [&str; 4] = [DRAFT, SCHEDULED, ACTIVE, SENDING];
}

pub mod recipient_status {
    pub const PENDING: &str = "pending";
    pub const QUEUED: &str = "queued";
    pub const SENT: &str = "sent";
    pub const FAILED: &str = "failed";
    pub const DELIVERED: &str = "delivered";
}

/// Error recorded on recipients abandoned by a cancel.
pub const CANCELLED_REASON: &str = "cancelled";

/// Recurrence columns as authored.
#[derive(Debug, Clone, Default)]
pub struct RecurrenceInput {
    pub kind: String,
    pub interval: Option<i32>,
    pub days: Option<Value>,
    pub time: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
    pub max_executions: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub tenant_id: Uuid,
    pub name: String,
    pub message: String,
    /// First due time. Without one a one-off campaign stays a draft.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrenceInput>,
}

#[derive(Debug, Clone)]
pub struct NewRecipient {
    pub customer_id: Option<Uuid>,
    pub customer_jid: String,
}

/// A pending recipient together with its personalization name.
#[derive(Debug, Clone)]
pub struct PendingRecipient {
    pub recipient: broadcast_recipient::Model,
    pub display_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateBroadcastError {
    #[error(transparent)]
    Recurrence(#[from] RecurrenceError),
    #[error(transparent)]
    Db(#[from] DbErr),
}

#[derive(Debug, Clone)]
pub struct BroadcastRepository {
    db: Arc<DatabaseConnection>,
}

impl BroadcastRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Author a campaign and its `pending` recipients in one transaction.
    ///
    /// Recurring campaigns start `active`, scheduled one-offs `scheduled`,
    /// anything else `draft`.
    pub async fn create(
        &self,
        new: NewBroadcast,
        recipients: Vec<NewRecipient>,
    ) -> Result<broadcast::Model, CreateBroadcastError> {
        if let Some(recurrence) = &new.recurrence {
            RecurrenceRule::parse(
                &recurrence.kind,
                recurrence.interval,
                recurrence.days.as_ref(),
                recurrence.time.as_deref(),
            )?;
        }

        let now = Utc::now();
        let is_recurring = new.recurrence.is_some();
        let status = if is_recurring {
            status::ACTIVE
        } else if new.scheduled_at.is_some() {
            status::SCHEDULED
        } else {
            status::DRAFT
        };
        let scheduled_at = if is_recurring {
            Some(new.scheduled_at.unwrap_or(now))
        } else {
            new.scheduled_at
        };
        let recurrence = new.recurrence.unwrap_or_default();
        let id = Uuid::new_v4();

        let mut seen = Vec::with_capacity(recipients.len());
        let recipient_rows: Vec<broadcast_recipient::ActiveModel> = recipients
            .into_iter()
            .filter_map(|r| {
                let customer_jid = jid::normalize(&r.customer_jid);
                if customer_jid.is_empty() || seen.contains(&customer_jid) {
                    return None;
                }
                seen.push(customer_jid.clone());
                Some(broadcast_recipient::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    broadcast_id: Set(id),
                    tenant_id: Set(new.tenant_id),
                    customer_id: Set(r.customer_id),
                    customer_jid: Set(customer_jid),
                    status: Set(recipient_status::PENDING.to_string()),
                    message_id: Set(None),
                    error_message: Set(None),
                    sent_at: Set(None),
                    delivered_at: Set(None),
                    created_at: Set(to_db_time(now)),
                    updated_at: Set(to_db_time(now)),
                })
            })
            .collect();

        let model = broadcast::Model {
            id,
            tenant_id: new.tenant_id,
            name: new.name,
            message_content: new.message,
            status: status.to_string(),
            scheduled_at: scheduled_at.map(to_db_time),
            is_recurring,
            recurrence_type: is_recurring.then(|| recurrence.kind.trim().to_ascii_lowercase()),
            recurrence_interval: recurrence.interval,
            recurrence_days: recurrence.days,
            recurrence_time: recurrence.time,
            recurrence_end_date: recurrence.end_date.map(to_db_time),
            recurrence_count: recurrence.max_executions,
            execution_count: 0,
            last_executed_at: None,
            started_at: None,
            completed_at: None,
            total_recipients: i32::try_from(recipient_rows.len()).unwrap_or(i32::MAX),
            sent_count: 0,
            delivered_count: 0,
            failed_count: 0,
            created_at: to_db_time(now),
            updated_at: to_db_time(now),
        };

        let txn = self.db.begin().await?;
        broadcast::Entity::insert(broadcast::ActiveModel::from(model.clone()))
            .exec_without_returning(&txn)
            .await?;
        if !recipient_rows.is_empty() {
            broadcast_recipient::Entity::insert_many(recipient_rows)
                .exec_without_returning(&txn)
                .await?;
        }
        txn.commit().await?;

        Ok(model)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<broadcast::Model>, DbErr> {
        broadcast::Entity::find_by_id(id).one(self.db.as_ref()).await
    }

    pub async fn recipients(
        &self,
        broadcast_id: Uuid,
    ) -> Result<Vec<broadcast_recipient::Model>, DbErr> {
        broadcast_recipient::Entity::find()
            .filter(broadcast_recipient::Column::BroadcastId.eq(broadcast_id))
            .order_by_asc(broadcast_recipient::Column::CreatedAt)
            .order_by_asc(broadcast_recipient::Column::Id)
            .all(self.db.as_ref())
            .await
    }

    pub async fn find_recipient(
        &self,
        recipient_id: Uuid,
    ) -> Result<Option<broadcast_recipient::Model>, DbErr> {
        broadcast_recipient::Entity::find_by_id(recipient_id)
            .one(self.db.as_ref())
            .await
    }

    /// Cancel a campaign that has not finished. Returns whether it changed.
    ///
    /// Recipients still `pending` or `queued` fail with [`CANCELLED_REASON`]
    /// in the same transaction, so jobs already on the delivery lane are
    /// dropped by the worker instead of sent.
    pub async fn cancel(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, DbErr> {
        let now = to_db_time(Utc::now());
        let txn = self.db.begin().await?;
        let result = broadcast::Entity::update_many()
            .col_expr(broadcast::Column::Status, Expr::value(status::CANCELLED))
            .col_expr(broadcast::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast::Column::Id.eq(id))
            .filter(broadcast::Column::TenantId.eq(tenant_id))
            .filter(broadcast::Column::Status.is_in(status::PRE_TERMINAL))
            .exec(&txn)
            .await?;
        if result.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(false);
        }

        let abandoned = broadcast_recipient::Entity::update_many()
            .col_expr(
                broadcast_recipient::Column::Status,
                Expr::value(recipient_status::FAILED),
            )
            .col_expr(
                broadcast_recipient::Column::ErrorMessage,
                Expr::value(CANCELLED_REASON),
            )
            .col_expr(broadcast_recipient::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast_recipient::Column::BroadcastId.eq(id))
            .filter(broadcast_recipient::Column::Status.is_in([
                recipient_status::PENDING,
                recipient_status::QUEUED,
            ]))
            .exec(&txn)
            .await?;
        if abandoned.rows_affected > 0 {
            let abandoned = i32::try_from(abandoned.rows_affected).unwrap_or(i32::MAX);
            broadcast::Entity::update_many()
                .col_expr(
                    broadcast::Column::FailedCount,
                    Expr::col(broadcast::Column::FailedCount).add(abandoned),
                )
                .filter(broadcast::Column::Id.eq(id))
                .exec(&txn)
                .await?;
        }
        txn.commit().await?;
        Ok(true)
    }

    /// Campaigns due at `now`, earliest first.
    pub async fn due_campaigns(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<broadcast::Model>, DbErr> {
        broadcast::Entity::find()
            .filter(
                Condition::any()
                    .add(broadcast::Column::Status.eq(status::SCHEDULED))
                    .add(
                        Condition::all()
                            .add(broadcast::Column::Status.eq(status::ACTIVE))
                            .add(broadcast::Column::IsRecurring.eq(true)),
                    ),
            )
            .filter(broadcast::Column::ScheduledAt.is_not_null())
            .filter(broadcast::Column::ScheduledAt.lte(to_db_time(now)))
            .order_by_asc(broadcast::Column::ScheduledAt)
            .limit(limit)
            .all(self.db.as_ref())
            .await
    }

    /// Compare-and-set a due campaign to `sending`.
    ///
    /// Returns `false` when another pass already claimed it.
    pub async fn claim(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, DbErr> {
        let now = to_db_time(now);
        let result = broadcast::Entity::update_many()
            .col_expr(broadcast::Column::Status, Expr::value(status::SENDING))
            .col_expr(broadcast::Column::StartedAt, Expr::value(now))
            .col_expr(broadcast::Column::LastExecutedAt, Expr::value(now))
            .col_expr(
                broadcast::Column::ExecutionCount,
                Expr::col(broadcast::Column::ExecutionCount).add(1),
            )
            .col_expr(broadcast::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast::Column::Id.eq(id))
            .filter(broadcast::Column::Status.is_in(status::CLAIMABLE))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Put recipients finished by an earlier occurrence back to `pending`.
    pub async fn reset_finished_recipients(&self, broadcast_id: Uuid) -> Result<u64, DbErr> {
        let result = broadcast_recipient::Entity::update_many()
            .col_expr(
                broadcast_recipient::Column::Status,
                Expr::value(recipient_status::PENDING),
            )
            .col_expr(
                broadcast_recipient::Column::MessageId,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                broadcast_recipient::Column::ErrorMessage,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                broadcast_recipient::Column::UpdatedAt,
                Expr::value(to_db_time(Utc::now())),
            )
            .filter(broadcast_recipient::Column::BroadcastId.eq(broadcast_id))
            .filter(broadcast_recipient::Column::Status.is_in([
                recipient_status::SENT,
                recipient_status::FAILED,
                recipient_status::DELIVERED,
            ]))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    /// Pending recipients in a stable order, with the name used for
    /// personalization (`customer_name`, else `customer_phone`, else empty).
    pub async fn pending_recipients(
        &self,
        broadcast_id: Uuid,
    ) -> Result<Vec<PendingRecipient>, DbErr> {
        let recipients = broadcast_recipient::Entity::find()
            .filter(broadcast_recipient::Column::BroadcastId.eq(broadcast_id))
            .filter(broadcast_recipient::Column::Status.eq(recipient_status::PENDING))
            .order_by_asc(broadcast_recipient::Column::CreatedAt)
            .order_by_asc(broadcast_recipient::Column::Id)
            .all(self.db.as_ref())
            .await?;

        let customer_ids: Vec<Uuid> = recipients.iter().filter_map(|r| r.customer_id).collect();
        let names: HashMap<Uuid, String> = if customer_ids.is_empty() {
            HashMap::new()
        } else {
            customer_insight::Entity::find()
                .filter(customer_insight::Column::Id.is_in(customer_ids))
                .all(self.db.as_ref())
                .await?
                .into_iter()
                .map(|c| {
                    let name = c
                        .customer_name
                        .or(c.customer_phone)
                        .unwrap_or_default();
                    (c.id, name)
                })
                .collect()
        };

        Ok(recipients
            .into_iter()
            .map(|recipient| {
                let display_name = recipient
                    .customer_id
                    .and_then(|id| names.get(&id).cloned())
                    .unwrap_or_default();
                PendingRecipient {
                    recipient,
                    display_name,
                }
            })
            .collect())
    }

    pub async fn mark_recipient_queued(&self, recipient_id: Uuid) -> Result<bool, DbErr> {
        let result = broadcast_recipient::Entity::update_many()
            .col_expr(
                broadcast_recipient::Column::Status,
                Expr::value(recipient_status::QUEUED),
            )
            .col_expr(
                broadcast_recipient::Column::UpdatedAt,
                Expr::value(to_db_time(Utc::now())),
            )
            .filter(broadcast_recipient::Column::Id.eq(recipient_id))
            .filter(broadcast_recipient::Column::Status.eq(recipient_status::PENDING))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Re-arm a recurring campaign for its next occurrence.
    pub async fn rearm(&self, id: Uuid, next_due: DateTime<Utc>) -> Result<bool, DbErr> {
        let result = broadcast::Entity::update_many()
            .col_expr(broadcast::Column::Status, Expr::value(status::ACTIVE))
            .col_expr(
                broadcast::Column::ScheduledAt,
                Expr::value(to_db_time(next_due)),
            )
            .col_expr(
                broadcast::Column::UpdatedAt,
                Expr::value(to_db_time(Utc::now())),
            )
            .filter(broadcast::Column::Id.eq(id))
            .filter(broadcast::Column::Status.eq(status::SENDING))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Mark a `sending` campaign completed once no recipient is `pending`
    /// or `queued`. Returns `true` only for the call that completed it.
    pub async fn complete_if_drained(&self, id: Uuid) -> Result<bool, DbErr> {
        let outstanding = broadcast_recipient::Entity::find()
            .filter(broadcast_recipient::Column::BroadcastId.eq(id))
            .filter(broadcast_recipient::Column::Status.is_in([
                recipient_status::PENDING,
                recipient_status::QUEUED,
            ]))
            .count(self.db.as_ref())
            .await?;
        if outstanding > 0 {
            return Ok(false);
        }

        let now = to_db_time(Utc::now());
        let result = broadcast::Entity::update_many()
            .col_expr(broadcast::Column::Status, Expr::value(status::COMPLETED))
            .col_expr(broadcast::Column::CompletedAt, Expr::value(now))
            .col_expr(broadcast::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast::Column::Id.eq(id))
            .filter(broadcast::Column::Status.eq(status::SENDING))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected == 1)
    }

    /// Record a successful send. Returns `false` when the recipient was not
    /// `queued`, leaving counters untouched.
    pub async fn record_delivery_success(
        &self,
        broadcast_id: Uuid,
        recipient_id: Uuid,
        message_id: &str,
    ) -> Result<bool, DbErr> {
        let now = to_db_time(Utc::now());
        let txn = self.db.begin().await?;
        let updated = broadcast_recipient::Entity::update_many()
            .col_expr(
                broadcast_recipient::Column::Status,
                Expr::value(recipient_status::SENT),
            )
            .col_expr(
                broadcast_recipient::Column::MessageId,
                Expr::value(message_id),
            )
            .col_expr(broadcast_recipient::Column::SentAt, Expr::value(now))
            .col_expr(broadcast_recipient::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast_recipient::Column::Id.eq(recipient_id))
            .filter(broadcast_recipient::Column::Status.eq(recipient_status::QUEUED))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }
        broadcast::Entity::update_many()
            .col_expr(
                broadcast::Column::SentCount,
                Expr::col(broadcast::Column::SentCount).add(1),
            )
            .col_expr(broadcast::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast::Column::Id.eq(broadcast_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(true)
    }

    /// Record a failed send or enqueue for a recipient that was not yet
    /// finished.
    pub async fn record_delivery_failure(
        &self,
        broadcast_id: Uuid,
        recipient_id: Uuid,
        error: &str,
    ) -> Result<bool, DbErr> {
        let now = to_db_time(Utc::now());
        let txn = self.db.begin().await?;
        let updated = broadcast_recipient::Entity::update_many()
            .col_expr(
                broadcast_recipient::Column::Status,
                Expr::value(recipient_status::FAILED),
            )
            .col_expr(
                broadcast_recipient::Column::ErrorMessage,
                Expr::value(error),
            )
            .col_expr(broadcast_recipient::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast_recipient::Column::Id.eq(recipient_id))
            .filter(broadcast_recipient::Column::Status.is_in([
                recipient_status::PENDING,
                recipient_status::QUEUED,
            ]))
            .exec(&txn)
            .await?;
        if updated.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(false);
        }
        broadcast::Entity::update_many()
            .col_expr(
                broadcast::Column::FailedCount,
                Expr::col(broadcast::Column::FailedCount).add(1),
            )
            .col_expr(broadcast::Column::UpdatedAt, Expr::value(now))
            .filter(broadcast::Column::Id.eq(broadcast_id))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(true)
    }
}

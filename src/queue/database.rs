//! Queue lanes stored in the `work_queue_items` table.
//!
//! A pop selects the oldest row of a lane and deletes it by id; only the
//! consumer whose delete affected the row owns the item. Waiters in this
//! process are woken on push and everyone polls for rows written by other
//! processes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::{Lane, WorkQueue};
use crate::config::QueueConfig;
use crate::db::to_db_time;
use crate::error::QueueError;
use crate::models::queue_item::{ActiveModel, Column, Entity};

/// Attempts per pop before yielding to the wait when rows keep being
/// taken by other consumers.
const MAX_CLAIM_ATTEMPTS: usize = 8;

#[derive(Debug)]
pub struct DatabaseQueue {
    db: Arc<DatabaseConnection>,
    ai_lane_key: String,
    broadcast_lane_key: String,
    poll_interval: Duration,
    auto_reply_notify: Notify,
    delivery_notify: Notify,
}

impl DatabaseQueue {
    pub fn new(db: Arc<DatabaseConnection>, config: &QueueConfig) -> Self {
        Self {
            db,
            ai_lane_key: config.ai_lane_key.clone(),
            broadcast_lane_key: config.broadcast_lane_key.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            auto_reply_notify: Notify::new(),
            delivery_notify: Notify::new(),
        }
    }

    fn key(&self, lane: Lane) -> &str {
        match lane {
            Lane::AutoReply => &self.ai_lane_key,
            Lane::BroadcastDelivery => &self.broadcast_lane_key,
        }
    }

    fn notifier(&self, lane: Lane) -> &Notify {
        match lane {
            Lane::AutoReply => &self.auto_reply_notify,
            Lane::BroadcastDelivery => &self.delivery_notify,
        }
    }

    async fn try_claim(&self, lane: Lane) -> Result<Option<String>, QueueError> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let Some(head) = Entity::find()
                .filter(Column::Lane.eq(self.key(lane)))
                .order_by_asc(Column::EnqueuedAt)
                .order_by_asc(Column::Id)
                .limit(1)
                .one(self.db.as_ref())
                .await?
            else {
                return Ok(None);
            };

            let deleted = Entity::delete_many()
                .filter(Column::Id.eq(head.id))
                .exec(self.db.as_ref())
                .await?;
            if deleted.rows_affected == 1 {
                return Ok(Some(head.payload));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl WorkQueue for DatabaseQueue {
    async fn push(&self, lane: Lane, payload: String) -> Result<(), QueueError> {
        let item = ActiveModel {
            id: Set(Uuid::now_v7()),
            lane: Set(self.key(lane).to_string()),
            payload: Set(payload),
            enqueued_at: Set(to_db_time(Utc::now())),
        };
        Entity::insert(item)
            .exec_without_returning(self.db.as_ref())
            .await?;
        self.notifier(lane).notify_one();
        Ok(())
    }

    async fn pop_blocking(
        &self,
        lane: Lane,
        timeout: Duration,
    ) -> Result<Option<String>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_claim(lane).await? {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = self.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, self.notifier(lane).notified()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, PaginatorTrait};

    async fn queue() -> (Arc<DatabaseConnection>, DatabaseQueue) {
        let db = Database::connect("sqlite::memory:")
            .await
            .expect("create in-memory db");
        Migrator::up(&db, None).await.expect("apply migrations");
        let db = Arc::new(db);
        let config = QueueConfig {
            poll_interval_ms: 10,
            ..QueueConfig::default()
        };
        (db.clone(), DatabaseQueue::new(db, &config))
    }

    #[tokio::test]
    async fn push_then_pop_removes_row() {
        let (db, queue) = queue().await;
        queue.push(Lane::AutoReply, "first".into()).await.unwrap();
        queue.push(Lane::AutoReply, "second".into()).await.unwrap();
        queue
            .push(Lane::BroadcastDelivery, "other".into())
            .await
            .unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(
            queue.pop_blocking(Lane::AutoReply, timeout).await.unwrap(),
            Some("first".to_string())
        );
        assert_eq!(
            queue.pop_blocking(Lane::AutoReply, timeout).await.unwrap(),
            Some("second".to_string())
        );
        assert_eq!(
            queue.pop_blocking(Lane::AutoReply, timeout).await.unwrap(),
            None
        );

        let remaining = Entity::find().count(db.as_ref()).await.unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_share_an_item() {
        let (_db, queue) = queue().await;
        let queue = Arc::new(queue);
        for i in 0..20 {
            queue
                .push(Lane::BroadcastDelivery, format!("item-{i}"))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(item) = queue
                    .pop_blocking(Lane::BroadcastDelivery, Duration::from_millis(30))
                    .await
                    .unwrap()
                {
                    taken.push(item);
                }
                taken
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }
}

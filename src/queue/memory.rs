//! In-process queue for single-node deployments and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Lane, WorkQueue};
use crate::error::QueueError;

#[derive(Debug, Default)]
struct LaneState {
    items: VecDeque<String>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    lanes: Mutex<HashMap<Lane, LaneState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, lane: Lane) -> usize {
        self.lanes
            .lock()
            .await
            .get(&lane)
            .map_or(0, |state| state.items.len())
    }

    pub async fn is_empty(&self, lane: Lane) -> bool {
        self.len(lane).await == 0
    }

    /// Pop without waiting; returns the item and the lane's notifier.
    async fn try_pop(&self, lane: Lane) -> (Option<String>, Arc<Notify>) {
        let mut lanes = self.lanes.lock().await;
        let state = lanes.entry(lane).or_default();
        (state.items.pop_front(), state.notify.clone())
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn push(&self, lane: Lane, payload: String) -> Result<(), QueueError> {
        let notify = {
            let mut lanes = self.lanes.lock().await;
            let state = lanes.entry(lane).or_default();
            state.items.push_back(payload);
            state.notify.clone()
        };
        notify.notify_one();
        Ok(())
    }

    async fn pop_blocking(
        &self,
        lane: Lane,
        timeout: Duration,
    ) -> Result<Option<String>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let (item, notify) = self.try_pop(lane).await;
            if item.is_some() {
                return Ok(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // A permit stored by notify_one before we wait is consumed here.
            let _ = tokio::time::timeout(deadline - now, notify.notified()).await;
        }
    }
}

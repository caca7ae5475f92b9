//! # Work Queue
//!
//! Durable FIFO lanes shared by the ingestion pipeline, the broadcast
//! scheduler and the two worker loops. Payloads are flat JSON records.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::QueueError;

mod database;
mod memory;

pub use database::DatabaseQueue;
pub use memory::MemoryQueue;

/// Logical partitions of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    AutoReply,
    BroadcastDelivery,
}

impl Lane {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::AutoReply => "auto_reply",
            Lane::BroadcastDelivery => "broadcast_delivery",
        }
    }
}

/// Push and blocking pop over named lanes.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, lane: Lane, payload: String) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the oldest item of `lane`.
    ///
    /// Each item is returned to exactly one caller.
    async fn pop_blocking(
        &self,
        lane: Lane,
        timeout: Duration,
    ) -> Result<Option<String>, QueueError>;
}

/// A payload type bound to the lane it travels on.
pub trait LaneJob: Serialize + DeserializeOwned + Send + Sync {
    const LANE: Lane;
}

/// Encode and push a job onto its lane.
pub async fn enqueue<J: LaneJob>(queue: &dyn WorkQueue, job: &J) -> Result<(), QueueError> {
    let payload = serde_json::to_string(job)?;
    queue.push(J::LANE, payload).await
}

/// Pop and decode one job, waiting up to `timeout`.
pub async fn dequeue<J: LaneJob>(
    queue: &dyn WorkQueue,
    timeout: Duration,
) -> Result<Option<J>, QueueError> {
    match queue.pop_blocking(J::LANE, timeout).await? {
        Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

/// Inbound message awaiting an automated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoReplyJob {
    pub tenant_id: Uuid,
    pub message_id: String,
    pub sender_jid: String,
    pub chat_jid: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub message_text: String,
    pub timestamp: DateTime<Utc>,
}

impl LaneJob for AutoReplyJob {
    const LANE: Lane = Lane::AutoReply;
}

/// One personalized campaign message for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub tenant_id: Uuid,
    pub broadcast_id: Uuid,
    pub recipient_id: Uuid,
    pub customer_jid: String,
    pub message: String,
    pub customer_name: String,
}

impl LaneJob for DeliveryJob {
    const LANE: Lane = Lane::BroadcastDelivery;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_encode_as_flat_records() {
        let job = DeliveryJob {
            tenant_id: Uuid::nil(),
            broadcast_id: Uuid::nil(),
            recipient_id: Uuid::nil(),
            customer_jid: "62811@s.whatsapp.net".to_string(),
            message: "Halo Budi".to_string(),
            customer_name: "Budi".to_string(),
        };
        let value = serde_json::to_value(&job).unwrap();
        let object = value.as_object().unwrap();
        assert!(object.values().all(|v| !v.is_object() && !v.is_array()));
        assert_eq!(object["customer_jid"], "62811@s.whatsapp.net");
    }

    #[test]
    fn auto_reply_job_tolerates_missing_sender_name() {
        let raw = r#"{
            "tenant_id": "00000000-0000-0000-0000-000000000000",
            "message_id": "m1",
            "sender_jid": "62811@s.whatsapp.net",
            "chat_jid": "62811@s.whatsapp.net",
            "message_text": "berapa harganya?",
            "timestamp": "2025-03-10T09:00:00Z"
        }"#;
        let job: AutoReplyJob = serde_json::from_str(raw).unwrap();
        assert_eq!(job.sender_name, None);
        assert_eq!(job.message_id, "m1");
    }
}

//! # Event Fan-out Hub
//!
//! Pushes `{event, data}` frames to every dashboard connection of a tenant.
//! The client registry is owned by a single loop task; callers only talk to
//! it through a bounded command channel. A client whose buffer is full is
//! dropped instead of stalling fan-out for everyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::telemetry::metric_names;

/// Event kinds pushed to dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubEvent {
    NewMessage,
    NewCustomer,
    CustomerUpdated,
    MessageSent,
    ConnectionStatus,
}

impl HubEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubEvent::NewMessage => "new_message",
            HubEvent::NewCustomer => "new_customer",
            HubEvent::CustomerUpdated => "customer_updated",
            HubEvent::MessageSent => "message_sent",
            HubEvent::ConnectionStatus => "connection_status",
        }
    }
}

#[derive(Serialize)]
struct Frame<'a> {
    event: &'a str,
    data: &'a Value,
}

/// Serialized frame shared by every recipient of one publish.
pub type FrameText = Arc<str>;

#[derive(Debug, thiserror::Error)]
#[error("event hub is not running")]
pub struct HubClosed;

enum Command {
    Register {
        id: u64,
        tenant_id: Uuid,
        sender: mpsc::Sender<FrameText>,
    },
    Unregister {
        id: u64,
    },
    Publish {
        tenant_id: Uuid,
        frame: FrameText,
    },
    ClientCount {
        tenant_id: Uuid,
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable handle used by publishers and the WebSocket endpoint.
#[derive(Clone)]
pub struct EventHub {
    commands: mpsc::Sender<Command>,
    client_buffer: usize,
    next_id: Arc<AtomicU64>,
}

/// The registry loop. Spawn [`HubLoop::run`] once.
pub struct HubLoop {
    commands: mpsc::Receiver<Command>,
    clients: HashMap<u64, Client>,
}

struct Client {
    tenant_id: Uuid,
    sender: mpsc::Sender<FrameText>,
}

/// A registered dashboard connection. Dropping it unregisters the client.
pub struct Subscription {
    id: u64,
    tenant_id: Uuid,
    receiver: mpsc::Receiver<FrameText>,
    commands: mpsc::Sender<Command>,
}

impl EventHub {
    pub fn new(config: &HubConfig) -> (Self, HubLoop) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let hub = Self {
            commands: tx,
            client_buffer: config.client_buffer.max(1),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let hub_loop = HubLoop {
            commands: rx,
            clients: HashMap::new(),
        };
        (hub, hub_loop)
    }

    /// Register a dashboard client for `tenant_id`.
    pub async fn subscribe(&self, tenant_id: Uuid) -> Result<Subscription, HubClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.client_buffer);
        self.commands
            .send(Command::Register {
                id,
                tenant_id,
                sender,
            })
            .await
            .map_err(|_| HubClosed)?;
        Ok(Subscription {
            id,
            tenant_id,
            receiver,
            commands: self.commands.clone(),
        })
    }

    /// Fan an event out to all clients of a tenant without waiting.
    ///
    /// When the hub is saturated the event is dropped and counted.
    pub fn publish(&self, tenant_id: Uuid, event: HubEvent, data: Value) {
        let frame = Frame {
            event: event.as_str(),
            data: &data,
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => FrameText::from(text),
            Err(err) => {
                warn!(error = %err, event = event.as_str(), "Failed to encode hub frame");
                return;
            }
        };
        match self.commands.try_send(Command::Publish {
            tenant_id,
            frame: text,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                counter!(metric_names::HUB_DROPPED_EVENTS, "event" => event.as_str()).increment(1);
                warn!(tenant_id = %tenant_id, event = event.as_str(), "Hub saturated; event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(tenant_id = %tenant_id, event = event.as_str(), "Hub stopped; event dropped");
            }
        }
    }

    /// Number of registered clients for a tenant.
    pub async fn client_count(&self, tenant_id: Uuid) -> Result<usize, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::ClientCount { tenant_id, reply })
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }
}

impl HubLoop {
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting event hub");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Event hub shutdown requested");
                    break;
                }
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle(command),
                        None => break,
                    }
                }
            }
        }
        self.clients.clear();
        gauge!(metric_names::HUB_CLIENTS).set(0.0);
        info!("Event hub stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register {
                id,
                tenant_id,
                sender,
            } => {
                self.clients.insert(id, Client { tenant_id, sender });
                debug!(client_id = id, tenant_id = %tenant_id, "Hub client registered");
            }
            Command::Unregister { id } => {
                if self.clients.remove(&id).is_some() {
                    debug!(client_id = id, "Hub client unregistered");
                }
            }
            Command::Publish { tenant_id, frame } => self.fan_out(tenant_id, frame),
            Command::ClientCount { tenant_id, reply } => {
                let count = self
                    .clients
                    .values()
                    .filter(|c| c.tenant_id == tenant_id)
                    .count();
                let _ = reply.send(count);
            }
        }
        gauge!(metric_names::HUB_CLIENTS).set(self.clients.len() as f64);
    }

    fn fan_out(&mut self, tenant_id: Uuid, frame: FrameText) {
        let mut dropped = Vec::new();
        for (id, client) in &self.clients {
            if client.tenant_id != tenant_id {
                continue;
            }
            if let Err(err) = client.sender.try_send(frame.clone()) {
                let reason = match err {
                    TrySendError::Full(_) => "full",
                    TrySendError::Closed(_) => "closed",
                };
                dropped.push((*id, reason));
            }
        }
        for (id, reason) in dropped {
            self.clients.remove(&id);
            counter!(metric_names::HUB_DROPPED_CLIENTS, "reason" => reason).increment(1);
            warn!(client_id = id, tenant_id = %tenant_id, reason, "Dropping hub client");
        }
    }
}

impl Subscription {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    /// Next frame, or `None` once the hub dropped this client.
    pub async fn recv(&mut self) -> Option<FrameText> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // If the command queue is full the loop still prunes the closed
        // sender on the next publish.
        let _ = self.commands.try_send(Command::Unregister { id: self.id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn start(client_buffer: usize) -> (EventHub, CancellationToken) {
        let (hub, hub_loop) = EventHub::new(&HubConfig {
            command_capacity: 64,
            client_buffer,
        });
        let shutdown = CancellationToken::new();
        tokio::spawn(hub_loop.run(shutdown.clone()));
        (hub, shutdown)
    }

    async fn next(sub: &mut Subscription) -> Option<Value> {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("frame within a second")
            .map(|text| serde_json::from_str(&text).unwrap())
    }

    #[tokio::test]
    async fn frames_reach_only_the_tenant() {
        let (hub, shutdown) = start(8);
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut mine = hub.subscribe(tenant).await.unwrap();
        let mut theirs = hub.subscribe(other).await.unwrap();

        hub.publish(tenant, HubEvent::NewMessage, json!({"message_id": "m1"}));
        hub.publish(other, HubEvent::ConnectionStatus, json!({"connected": true}));

        let frame = next(&mut mine).await.unwrap();
        assert_eq!(frame["event"], "new_message");
        assert_eq!(frame["data"]["message_id"], "m1");

        let frame = next(&mut theirs).await.unwrap();
        assert_eq!(frame["event"], "connection_status");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn full_client_is_dropped_while_others_continue() {
        let (hub, shutdown) = start(1);
        let tenant = Uuid::new_v4();
        let mut slow = hub.subscribe(tenant).await.unwrap();
        let mut fast = hub.subscribe(tenant).await.unwrap();

        hub.publish(tenant, HubEvent::NewMessage, json!({"n": 1}));
        assert_eq!(next(&mut fast).await.unwrap()["data"]["n"], 1);

        // The slow client still holds frame 1, so frame 2 overflows it.
        hub.publish(tenant, HubEvent::NewMessage, json!({"n": 2}));
        assert_eq!(next(&mut fast).await.unwrap()["data"]["n"], 2);

        hub.publish(tenant, HubEvent::NewMessage, json!({"n": 3}));
        assert_eq!(next(&mut fast).await.unwrap()["data"]["n"], 3);

        assert_eq!(next(&mut slow).await.unwrap()["data"]["n"], 1);
        assert!(next(&mut slow).await.is_none());
        assert_eq!(hub.client_count(tenant).await.unwrap(), 1);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn saturated_hub_drops_events_and_recovers() {
        let (hub, hub_loop) = EventHub::new(&HubConfig {
            command_capacity: 1,
            client_buffer: 8,
        });
        let tenant = Uuid::new_v4();

        // Nothing drains the channel yet: the first publish fills it and the
        // rest are dropped without blocking the caller.
        for n in 0..4 {
            hub.publish(tenant, HubEvent::NewMessage, json!({"n": n}));
        }

        let shutdown = CancellationToken::new();
        tokio::spawn(hub_loop.run(shutdown.clone()));
        let mut sub = hub.subscribe(tenant).await.unwrap();
        hub.publish(tenant, HubEvent::NewMessage, json!({"n": "after"}));
        assert_eq!(next(&mut sub).await.unwrap()["data"]["n"], "after");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let (hub, shutdown) = start(4);
        let tenant = Uuid::new_v4();
        let sub = hub.subscribe(tenant).await.unwrap();
        assert_eq!(hub.client_count(tenant).await.unwrap(), 1);
        drop(sub);
        assert_eq!(hub.client_count(tenant).await.unwrap(), 0);
        shutdown.cancel();
    }
}

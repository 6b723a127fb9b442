//! Phase hand-off bus.
//!
//! Each phase workload publishes exactly one small message on a channel
//! derived from the task id; the orchestrator subscribes before launching
//! the child and waits with a deadline. The bus is a wake-up hint, never
//! the source of truth: a missed or late message only costs a store
//! reconciliation, not correctness.

pub mod memory;
pub mod redis;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use memory::{MemoryBus, MemorySubscription};
pub use redis::{RedisBus, RedisSubscription};

use std::time::Duration;

/// Outcome flag carried by a phase message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Ok,
    Error,
}

/// The single message a phase publishes when it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMessage {
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PhaseMessage {
    pub fn ok() -> Self {
        Self {
            status: PhaseStatus::Ok,
            detail: None,
        }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: PhaseStatus::Error,
            detail: Some(detail.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == PhaseStatus::Ok
    }
}

/// Channel carrying the input filer's completion message.
pub fn input_filer_channel(task_id: &str) -> String {
    format!("task/{task_id}/filer/input")
}

/// Channel carrying the output filer's completion message.
pub fn output_filer_channel(task_id: &str) -> String {
    format!("task/{task_id}/filer/output")
}

/// Channel carrying the executor monitor's completion message.
pub fn texam_channel(task_id: &str) -> String {
    format!("task/{task_id}/texam")
}

/// The bus, dispatching over the configured driver.
#[derive(Debug, Clone)]
pub enum MessageBus {
    Memory(MemoryBus),
    Redis(RedisBus),
}

/// A live subscription. Registration happens in [`MessageBus::subscribe`],
/// so a message published after `subscribe` returns is never missed by a
/// later `recv`.
pub enum Subscription {
    Memory(MemorySubscription),
    Redis(RedisSubscription),
}

impl MessageBus {
    /// Publish a phase message. Fire-and-forget: absent subscribers are
    /// not an error.
    pub async fn publish(&self, channel: &str, message: &PhaseMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        match self {
            Self::Memory(bus) => bus.publish(channel, payload).await,
            Self::Redis(bus) => bus.publish(channel, payload).await,
        }
    }

    /// Open a subscription on `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        match self {
            Self::Memory(bus) => Ok(Subscription::Memory(bus.subscribe(channel).await)),
            Self::Redis(bus) => Ok(Subscription::Redis(bus.subscribe(channel).await?)),
        }
    }
}

impl Subscription {
    /// Wait up to `timeout` for the next message; `None` timeout blocks
    /// indefinitely. Returns `Ok(None)` on timeout.
    pub async fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<PhaseMessage>> {
        let payload = match self {
            Self::Memory(sub) => sub.recv(timeout).await?,
            Self::Redis(sub) => sub.recv(timeout).await?,
        };
        match payload {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

//! In-process bus driver for tests and single-process runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::errors::Result;

const CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

pub struct MemorySubscription {
    receiver: broadcast::Receiver<String>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub(super) async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        // A send without subscribers only means nobody was listening yet;
        // pub/sub drops such messages by definition.
        let _ = self.sender(channel).await.send(payload);
        Ok(())
    }

    pub(super) async fn subscribe(&self, channel: &str) -> MemorySubscription {
        MemorySubscription {
            receiver: self.sender(channel).await.subscribe(),
        }
    }
}

impl MemorySubscription {
    pub(super) async fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
        let next = async {
            loop {
                match self.receiver.recv().await {
                    Ok(payload) => return Some(payload),
                    // Skip over dropped backlog; the next message still comes.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };
        match timeout {
            Some(limit) => Ok(tokio::time::timeout(limit, next).await.unwrap_or(None)),
            None => Ok(next.await),
        }
    }
}

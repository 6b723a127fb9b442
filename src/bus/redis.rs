//! Redis pub/sub driver.
//!
//! Publishes go through a shared multiplexed connection; each subscription
//! holds its own pub/sub connection because Redis dedicates the connection
//! to the subscriber protocol once `SUBSCRIBE` is issued.

use std::time::Duration;

use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::config::BusConfig;
use crate::errors::Result;

#[derive(Debug, Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

pub struct RedisSubscription {
    pubsub: redis::aio::PubSub,
}

impl RedisBus {
    pub async fn connect(cfg: &BusConfig) -> Result<Self> {
        let client = redis::Client::open(cfg.url())
            .map_err(crate::errors::PoiesisError::from)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, publisher })
    }

    pub(super) async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.publisher.clone();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    pub(super) async fn subscribe(&self, channel: &str) -> Result<RedisSubscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(RedisSubscription { pubsub })
    }
}

impl RedisSubscription {
    pub(super) async fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<String>> {
        let mut stream = self.pubsub.on_message();
        let next = async {
            match stream.next().await {
                Some(msg) => msg.get_payload::<String>().ok(),
                None => None,
            }
        };
        match timeout {
            Some(limit) => Ok(tokio::time::timeout(limit, next).await.unwrap_or(None)),
            None => Ok(next.await),
        }
    }
}

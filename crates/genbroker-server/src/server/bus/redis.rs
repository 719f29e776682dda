use super::{Bus, BusError, Subscription};
use ::redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use bytes::Bytes;
use futures::StreamExt;

/// [`Bus`] over Redis pub/sub.
///
/// Publishing goes through one shared multiplexed connection. Each
/// subscription opens its own connection, because a Redis connection in
/// subscriber mode cannot issue other commands; dropping the subscription
/// closes that connection, which unsubscribes server-side.
pub struct RedisBus {
    client: Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Opens the publishing connection. Subscription connections are opened
    /// on demand.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        tracing::debug!("Connected to redis bus");
        Ok(Self { client, publisher })
    }
}

#[async_trait::async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize, BusError> {
        let mut conn = self.publisher.clone();
        let receivers: usize = conn.publish(topic, &payload[..]).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        // Resolves only after redis has confirmed the subscription.
        pubsub.subscribe(topic).await?;
        let messages = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));
        Ok(Box::pin(messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use genbroker_core::JobId;

    #[tokio::test]
    #[ignore = "needs a running redis server, BUS_URL=redis://..."]
    async fn round_trips_through_redis() {
        let url = std::env::var("BUS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/0".into());
        let bus = RedisBus::connect(&url).await.unwrap();
        let topic = JobId::new().reply_topic();

        let mut subscription = bus.subscribe(&topic).await.unwrap();
        let receivers = bus
            .publish(&topic, Bytes::from_static(b"{\"output\":\"hi\"}"))
            .await
            .unwrap();
        assert_eq!(receivers, 1);

        let payload = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, Bytes::from_static(b"{\"output\":\"hi\"}"));
    }
}

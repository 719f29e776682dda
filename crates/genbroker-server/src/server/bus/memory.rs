use super::{Bus, BusError, Subscription};
use bytes::Bytes;
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;

type Topics = Mutex<HashMap<String, Vec<Subscriber>>>;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

/// In-process bus with Redis pub/sub semantics.
///
/// Every subscriber of a topic receives every message published after it
/// subscribed. Nothing is buffered for topics with no subscribers.
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<Topics>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one live subscription.
    pub fn topic_count(&self) -> usize {
        self.topics.lock().len()
    }

    fn publish_now(&self, topic: &str, payload: &Bytes) -> usize {
        let mut topics = self.topics.lock();
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };
        subscribers.retain(|sub| sub.tx.send(payload.clone()).is_ok());
        let delivered = subscribers.len();
        if delivered == 0 {
            topics.remove(topic);
        }
        delivered
    }

    fn subscribe_now(&self, topic: &str) -> MemorySubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry(topic.to_owned())
            .or_default()
            .push(Subscriber { id, tx });
        MemorySubscription {
            topics: Arc::clone(&self.topics),
            topic: topic.to_owned(),
            id,
            rx,
        }
    }
}

#[async_trait::async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<usize, BusError> {
        Ok(self.publish_now(topic, &payload))
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        Ok(Box::pin(self.subscribe_now(topic)))
    }
}

/// Receiving end of a [`MemoryBus`] subscription. Unsubscribes on drop.
struct MemorySubscription {
    topics: Arc<Topics>,
    topic: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Stream for MemorySubscription {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let mut topics = self.topics.lock();
        if let Some(subscribers) = topics.get_mut(&self.topic) {
            subscribers.retain(|sub| sub.id != self.id);
            if subscribers.is_empty() {
                topics.remove(&self.topic);
            }
        }
    }
}

//! Reply correlation: routing one asynchronous worker reply back to the one
//! request waiting for it.
//!
//! Every job gets a fresh [`JobId`] and its own reply topic derived from that
//! id. [`CorrelationManager::open`] subscribes to the topic *before* handing
//! back the channel, so the job cannot be published (and answered) before
//! anyone is listening.
//!
//! [`ReplyChannel::await_reply`] consumes the channel. Whatever the outcome
//! (reply, timeout, cancellation, or the future simply being dropped) the
//! subscription is dropped with it and the topic is unsubscribed.

use crate::server::bus::{Bus, BusError, Subscription};
use core::{fmt, time::Duration};
use futures::StreamExt;
use genbroker_core::{Error, JobId, Reply, ReplyEnvelope, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Allocates per-job reply channels on a shared bus.
#[derive(Clone)]
pub struct CorrelationManager {
    bus: Arc<dyn Bus>,
}

impl CorrelationManager {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self { bus }
    }

    /// Allocates a new job id and subscribes to its reply topic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the subscription cannot be established.
    pub async fn open(&self) -> Result<ReplyChannel> {
        let id = JobId::new();
        let subscription = self.bus.subscribe(&id.reply_topic()).await?;
        Ok(ReplyChannel { id, subscription })
    }
}

/// An active subscription to one job's reply topic.
pub struct ReplyChannel {
    id: JobId,
    subscription: Subscription,
}

impl ReplyChannel {
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Waits for the first message on the channel and decodes it.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing arrives within `timeout`.
    /// - [`Error::ServiceShutdown`] if `cancel` fires first.
    /// - [`Error::Transport`] if the subscription ends early or the payload
    ///   is not a valid reply for this job.
    pub async fn await_reply(mut self, timeout: Duration, cancel: &CancellationToken) -> Result<Reply> {
        let id = self.id;
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::ServiceShutdown),
            received = tokio::time::timeout(timeout, self.subscription.next()) => received,
        };

        match received {
            Err(_elapsed) => Err(Error::Timeout { after: timeout }),
            Ok(None) => Err(BusError::Closed.into()),
            Ok(Some(payload)) => ReplyEnvelope::decode(&payload)?.into_reply(id),
        }
    }
}

impl fmt::Debug for ReplyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyChannel").field("id", &self.id).finish()
    }
}

//! Reference implementation of the worker side of the bus contract.
//!
//! Production workers live outside this crate. This harness exists so the
//! broker can be exercised end to end: tests plug in their own [`Generate`]
//! implementations, and `EMBEDDED_WORKER=true` runs an [`EchoGenerator`]
//! in-process on a `memory://` bus.
//!
//! The contract a worker must honor:
//!
//! - subscribe to the job topic;
//! - process each job exactly once;
//! - publish exactly one [`ReplyEnvelope`] on the job's own `reply_to` topic.

use crate::server::bus::{Bus, BusError};
use bytes::Bytes;
use futures::StreamExt;
use genbroker_core::{GenerationParameters, JobEnvelope, ReplyEnvelope};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Produces the output text for one job, or an error message for the caller.
#[async_trait::async_trait]
pub trait Generate: Send + Sync + 'static {
    async fn generate(&self, inputs: &str, parameters: &GenerationParameters)
    -> Result<String, String>;
}

#[async_trait::async_trait]
impl<F> Generate for F
where
    F: Fn(&str, &GenerationParameters) -> Result<String, String> + Send + Sync + 'static,
{
    async fn generate(
        &self,
        inputs: &str,
        parameters: &GenerationParameters,
    ) -> Result<String, String> {
        self(inputs, parameters)
    }
}

/// Echoes back at most `max_new_tokens` whitespace-separated words of the
/// input.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGenerator;

#[async_trait::async_trait]
impl Generate for EchoGenerator {
    async fn generate(
        &self,
        inputs: &str,
        parameters: &GenerationParameters,
    ) -> Result<String, String> {
        let limit = usize::try_from(parameters.max_new_tokens).unwrap_or(0);
        Ok(inputs
            .split_whitespace()
            .take(limit)
            .collect::<Vec<_>>()
            .join(" "))
    }
}

/// Subscribes to `job_topic` and spawns the worker loop.
///
/// The subscription is active when this returns, so jobs published afterwards
/// are never missed. Each job is handled on its own task. The loop stops when
/// `shutdown` is cancelled or the subscription ends.
pub async fn spawn_worker(
    bus: Arc<dyn Bus>,
    job_topic: &str,
    generator: Arc<dyn Generate>,
    shutdown: CancellationToken,
) -> Result<JoinHandle<()>, BusError> {
    let mut jobs = bus.subscribe(job_topic).await?;
    let job_topic = job_topic.to_owned();

    Ok(tokio::spawn(async move {
        tracing::debug!(topic = %job_topic, "Worker started");
        loop {
            let payload = tokio::select! {
                () = shutdown.cancelled() => break,
                next = jobs.next() => match next {
                    Some(payload) => payload,
                    None => {
                        tracing::warn!(topic = %job_topic, "Job subscription closed");
                        break;
                    }
                },
            };

            let job = match JobEnvelope::decode(&payload) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!("Dropping undecodable job: {e}");
                    continue;
                }
            };

            tokio::spawn(process_job(Arc::clone(&bus), Arc::clone(&generator), job));
        }
        tracing::debug!(topic = %job_topic, "Worker stopped");
    }))
}

async fn process_job(bus: Arc<dyn Bus>, generator: Arc<dyn Generate>, job: JobEnvelope) {
    let reply = match generator.generate(&job.inputs, &job.parameters).await {
        Ok(output) => ReplyEnvelope::output(job.id, output),
        Err(error) => ReplyEnvelope::error(job.id, error),
    };

    let payload = match reply.encode() {
        Ok(payload) => Bytes::from(payload),
        Err(e) => {
            tracing::error!(job_id = %job.id, "Failed to encode reply: {e}");
            return;
        }
    };

    match bus.publish(&job.reply_to, payload).await {
        Ok(0) => tracing::warn!(job_id = %job.id, "Reply had no listener"),
        Ok(_) => tracing::trace!(job_id = %job.id, "Reply published"),
        Err(e) => tracing::error!(job_id = %job.id, "Failed to publish reply: {e}"),
    }
}

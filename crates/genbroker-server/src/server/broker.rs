//! Request orchestration.
//!
//! [`Broker::generate`] drives one request through
//! `Received → Validated → Admitted → Correlating → AwaitingReply` and on to
//! exactly one terminal state (`Completed`, `Rejected` or `Failed`).
//!
//! ## Responsibilities
//!
//! - Validate the request before touching any shared state.
//! - Take an admission slot, or reject immediately when none is free.
//! - Subscribe to the job's reply topic, then publish the job.
//! - Wait for the reply, bounded by the reply timeout and the shutdown token.
//! - Release the slot exactly once, whichever way the request ends.

use crate::server::{
    admission::{AdmissionController, AdmissionPermit},
    bus::Bus,
    config::ServerConfig,
    correlation::CorrelationManager,
    telemetry::{
        decrement_jobs_inflight, increment_job_failures, increment_jobs_inflight,
        increment_rejections, increment_requests, record_job_duration,
    },
};
use bytes::Bytes;
use core::{fmt, time::Duration};
use genbroker_core::{Error, GenerateRequest, JobEnvelope, Result, ValidatedJob};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one request, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Validated,
    Admitted,
    Correlating,
    AwaitingReply,
    Completed,
    Rejected,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Admitted => "admitted",
            Self::Correlating => "correlating",
            Self::AwaitingReply => "awaiting_reply",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub capacity: usize,
    pub job_topic: String,
    pub reply_timeout: Duration,
}

impl From<&ServerConfig> for BrokerOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            capacity: config.capacity,
            job_topic: config.job_topic.clone(),
            reply_timeout: config.reply_timeout,
        }
    }
}

/// Brokers generation requests between HTTP callers and the worker pool.
///
/// Cheap to clone; clones share admission state and the bus connection.
#[derive(Clone)]
pub struct Broker {
    bus: Arc<dyn Bus>,
    admission: AdmissionController,
    correlation: CorrelationManager,
    job_topic: Arc<str>,
    reply_timeout: Duration,
    draining: Arc<AtomicBool>,
    shutdown_token: CancellationToken,
}

impl Broker {
    pub fn new(bus: Arc<dyn Bus>, options: BrokerOptions) -> Self {
        Self {
            correlation: CorrelationManager::new(Arc::clone(&bus)),
            bus,
            admission: AdmissionController::new(options.capacity),
            job_topic: options.job_topic.into(),
            reply_timeout: options.reply_timeout,
            draining: Arc::new(AtomicBool::new(false)),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Token cancelled once the broker has given up on in-flight jobs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs one request to completion and returns the generated text.
    ///
    /// # Errors
    ///
    /// Any [`Error`] variant; see the module docs for which state produces
    /// which error.
    #[tracing::instrument(skip_all, fields(job_id = tracing::field::Empty))]
    pub async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        increment_requests();
        tracing::debug!(state = %JobState::Received, "Received request");

        let job = match request.validate() {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(state = %JobState::Rejected, field = e.field, "{e}");
                increment_rejections("validation");
                return Err(e.into());
            }
        };
        tracing::debug!(state = %JobState::Validated, parameters = ?job.parameters);

        if self.is_draining() {
            increment_rejections("shutdown");
            return Err(Error::ServiceShutdown);
        }

        let Some(permit) = self.admission.try_admit() else {
            tracing::warn!(
                state = %JobState::Rejected,
                capacity = self.admission.capacity(),
                "Queue is full, try again later"
            );
            increment_rejections("capacity");
            return Err(Error::CapacityExceeded);
        };
        let slot = AdmittedSlot::new(permit);
        tracing::debug!(state = %JobState::Admitted, in_flight = self.admission.in_flight());

        let result = self.dispatch(job).await;
        let elapsed_ms = slot.elapsed_ms();
        drop(slot);

        match &result {
            Ok(output) => {
                tracing::info!(state = %JobState::Completed, elapsed_ms, "Generated output: {output}");
                record_job_duration(elapsed_ms);
            }
            Err(e) => {
                tracing::error!(state = %JobState::Failed, elapsed_ms, "{e}");
                increment_job_failures(failure_kind(e));
            }
        }
        result
    }

    async fn dispatch(&self, job: ValidatedJob) -> Result<String> {
        let channel = self.correlation.open().await?;
        let id = channel.id();
        tracing::Span::current().record("job_id", tracing::field::display(id));
        tracing::debug!(state = %JobState::Correlating, "Subscribed to reply topic");

        let payload = Bytes::from(JobEnvelope::new(id, job).encode()?);
        let receivers = self.bus.publish(&self.job_topic, payload).await?;
        if receivers == 0 {
            tracing::warn!(topic = %self.job_topic, "No worker is subscribed to the job topic");
        }

        tracing::debug!(state = %JobState::AwaitingReply, receivers);
        channel
            .await_reply(self.reply_timeout, &self.shutdown_token)
            .await?
            .into_result()
    }

    /// Stops admitting new jobs, waits up to `drain_timeout` for in-flight
    /// jobs to finish, then cancels whatever is still waiting.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.draining.store(true, Ordering::Release);
        tracing::info!(
            "Draining in-flight jobs ({} active)",
            self.admission.in_flight()
        );

        let drained = timeout(drain_timeout, async {
            while self.admission.in_flight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight jobs drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} jobs still active)",
                self.admission.in_flight()
            ),
        }

        self.shutdown_token.cancel();
    }
}

/// Couples the admission permit with the in-flight gauge so both are released
/// together, including when the request future is dropped mid-flight.
struct AdmittedSlot {
    _permit: AdmissionPermit,
    admitted_at: Instant,
}

impl AdmittedSlot {
    fn new(permit: AdmissionPermit) -> Self {
        increment_jobs_inflight();
        Self {
            _permit: permit,
            admitted_at: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.admitted_at.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for AdmittedSlot {
    fn drop(&mut self) {
        decrement_jobs_inflight();
    }
}

const fn failure_kind(err: &Error) -> &'static str {
    match err {
        Error::Validation(_) => "validation",
        Error::CapacityExceeded => "capacity",
        Error::WorkerReported { .. } => "worker",
        Error::Timeout { .. } => "timeout",
        Error::Transport { .. } => "transport",
        Error::ServiceShutdown => "shutdown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        bus::{BusError, Subscription, memory::MemoryBus},
        worker::{EchoGenerator, Generate, spawn_worker},
    };
    use genbroker_core::{GenerationParameters, ValidationErrorKind};
    use serde_json::json;

    const TOPIC: &str = "query";

    fn options(capacity: usize, reply_timeout: Duration) -> BrokerOptions {
        BrokerOptions {
            capacity,
            job_topic: TOPIC.into(),
            reply_timeout,
        }
    }

    async fn with_worker(
        capacity: usize,
        reply_timeout: Duration,
        generator: impl Generate,
    ) -> (MemoryBus, Broker) {
        let bus = MemoryBus::new();
        let shared: Arc<dyn Bus> = Arc::new(bus.clone());
        spawn_worker(
            Arc::clone(&shared),
            TOPIC,
            Arc::new(generator),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        (bus, Broker::new(shared, options(capacity, reply_timeout)))
    }

    #[tokio::test]
    async fn completes_with_worker_output() {
        let (bus, broker) = with_worker(4, Duration::from_secs(5), EchoGenerator).await;
        let output = broker
            .generate(&GenerateRequest::new("hello world"))
            .await
            .unwrap();
        assert_eq!(output, "hello world");
        assert_eq!(broker.admission().in_flight(), 0);
        // Only the worker's job subscription remains.
        assert_eq!(bus.topic_count(), 1);
    }

    #[tokio::test]
    async fn worker_failure_releases_the_slot() {
        let (_bus, broker) = with_worker(
            4,
            Duration::from_secs(5),
            |_: &str, _: &GenerationParameters| Err::<String, _>("oom".to_owned()),
        )
        .await;
        let err = broker.generate(&GenerateRequest::new("hi")).await.unwrap_err();
        assert_eq!(err, Error::WorkerReported { message: "oom".into() });
        assert_eq!(broker.admission().in_flight(), 0);
    }

    #[tokio::test]
    async fn invalid_request_touches_nothing() {
        let bus = MemoryBus::new();
        let broker = Broker::new(Arc::new(bus.clone()), options(4, Duration::from_secs(5)));
        let request = GenerateRequest::new("hi").with_parameters(json!({ "max_new_tokens": 1000 }));

        match broker.generate(&request).await {
            Err(Error::Validation(validation)) => {
                assert_eq!(validation.kind, ValidationErrorKind::TokenLimitExceeded);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(broker.admission().in_flight(), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn full_broker_rejects_without_subscribing() {
        let bus = MemoryBus::new();
        let broker = Broker::new(Arc::new(bus.clone()), options(32, Duration::from_secs(60)));

        // Occupy every slot with jobs nobody will answer.
        let waiting: Vec<_> = (0..32)
            .map(|_| {
                let broker = broker.clone();
                tokio::spawn(async move { broker.generate(&GenerateRequest::new("hi")).await })
            })
            .collect();
        while bus.topic_count() < 32 {
            tokio::task::yield_now().await;
        }
        assert_eq!(broker.admission().in_flight(), 32);

        let err = broker.generate(&GenerateRequest::new("one more")).await.unwrap_err();
        assert_eq!(err, Error::CapacityExceeded);
        assert_eq!(bus.topic_count(), 32);

        for handle in waiting {
            handle.abort();
            let _ = handle.await;
        }
        assert_eq!(broker.admission().in_flight(), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_slot_and_subscription() {
        let bus = MemoryBus::new();
        let broker = Broker::new(Arc::new(bus.clone()), options(1, Duration::from_secs(2)));

        let err = broker.generate(&GenerateRequest::new("hi")).await.unwrap_err();
        assert_eq!(err, Error::Timeout { after: Duration::from_secs(2) });
        assert_eq!(broker.admission().in_flight(), 0);
        assert_eq!(bus.topic_count(), 0);

        // The slot is usable again.
        assert!(broker.admission().try_admit().is_some());
    }

    #[tokio::test]
    async fn dropped_request_releases_its_slot() {
        let bus = MemoryBus::new();
        let broker = Broker::new(Arc::new(bus.clone()), options(1, Duration::from_secs(60)));

        let abandoned = timeout(
            Duration::from_millis(50),
            broker.generate(&GenerateRequest::new("hi")),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(broker.admission().in_flight(), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    struct UnpublishableBus(MemoryBus);

    #[async_trait::async_trait]
    impl Bus for UnpublishableBus {
        async fn publish(&self, _topic: &str, _payload: Bytes) -> std::result::Result<usize, BusError> {
            Err(BusError::Closed)
        }

        async fn subscribe(&self, topic: &str) -> std::result::Result<Subscription, BusError> {
            self.0.subscribe(topic).await
        }
    }

    #[tokio::test]
    async fn publish_failure_after_admission_releases_the_slot() {
        let bus = MemoryBus::new();
        let broker = Broker::new(
            Arc::new(UnpublishableBus(bus.clone())),
            options(1, Duration::from_secs(5)),
        );

        let err = broker.generate(&GenerateRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(broker.admission().in_flight(), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_get_their_own_replies() {
        let (_bus, broker) = with_worker(
            32,
            Duration::from_secs(5),
            |inputs: &str, _: &GenerationParameters| Ok::<_, String>(format!("echo:{inputs}")),
        )
        .await;

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let broker = broker.clone();
                tokio::spawn(async move {
                    let output = broker
                        .generate(&GenerateRequest::new(format!("req-{i}")))
                        .await
                        .unwrap();
                    (i, output)
                })
            })
            .collect();

        for handle in handles {
            let (i, output) = handle.await.unwrap();
            assert_eq!(output, format!("echo:req-{i}"));
        }
        assert_eq!(broker.admission().in_flight(), 0);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work_and_cancels_waiters() {
        let bus = MemoryBus::new();
        let broker = Broker::new(Arc::new(bus.clone()), options(4, Duration::from_secs(60)));

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.generate(&GenerateRequest::new("hi")).await })
        };
        while bus.topic_count() < 1 {
            tokio::task::yield_now().await;
        }

        broker.shutdown(Duration::from_millis(200)).await;

        assert_eq!(waiter.await.unwrap(), Err(Error::ServiceShutdown));
        assert_eq!(
            broker.generate(&GenerateRequest::new("late")).await,
            Err(Error::ServiceShutdown)
        );
        assert_eq!(broker.admission().in_flight(), 0);
    }
}

use crate::server::bus::BusEndpoint;
use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use genbroker_core::types::{DEFAULT_CAPACITY, DEFAULT_JOB_TOPIC};

/// Runtime configuration for the `genbroker-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "genbroker-server",
    version,
    about = "HTTP generation broker backed by a pub/sub worker pool"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:8000"))]
    pub server_addr: String,

    /// Pub/sub endpoint shared with the worker pool: `redis://…`,
    /// `rediss://…` or `memory://` for an in-process bus.
    ///
    /// Environment variable: `BUS_URL`
    #[arg(long, env = "BUS_URL", default_value_t = String::from("redis://127.0.0.1:6379/0"))]
    pub bus_url: String,

    /// Topic jobs are published on.
    ///
    /// Environment variable: `JOB_TOPIC`
    #[arg(long, env = "JOB_TOPIC", default_value_t = String::from(DEFAULT_JOB_TOPIC))]
    pub job_topic: String,

    /// Maximum number of admitted jobs awaiting a reply. Requests beyond this
    /// are rejected with 503 instead of queueing.
    ///
    /// Environment variable: `CAPACITY`
    #[arg(long, env = "CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub capacity: usize,

    /// How long a request waits for its worker reply, in milliseconds.
    ///
    /// Environment variable: `REPLY_TIMEOUT_MS`
    #[arg(long, env = "REPLY_TIMEOUT_MS", default_value_t = 60_000)]
    pub reply_timeout_ms: u64,

    /// Maximum number of HTTP requests handled concurrently. Each request
    /// holds its handler for the full generation latency, so this bounds
    /// handler occupancy independently of `CAPACITY`.
    ///
    /// Environment variable: `MAX_CONCURRENT_REQUESTS`
    #[arg(long, env = "MAX_CONCURRENT_REQUESTS", default_value_t = 256)]
    pub max_concurrent_requests: usize,

    /// Maximum accepted request body size in bytes.
    ///
    /// Environment variable: `REQUEST_BODY_LIMIT_BYTES`
    #[arg(long, env = "REQUEST_BODY_LIMIT_BYTES", default_value_t = 1024 * 1024)]
    pub request_body_limit_bytes: usize,

    /// Seconds to wait for in-flight jobs to drain on shutdown before
    /// cancelling them.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Run an echo worker inside the broker process. Only valid with
    /// `memory://`.
    ///
    /// Environment variable: `EMBEDDED_WORKER`
    #[arg(long, env = "EMBEDDED_WORKER", default_value_t = false)]
    pub embedded_worker: bool,

    /// Log output format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub bus: BusEndpoint,
    pub job_topic: String,
    pub capacity: usize,
    pub reply_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub request_body_limit_bytes: usize,
    pub shutdown_timeout: Duration,
    pub embedded_worker: bool,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.capacity == 0 {
            bail!("CAPACITY must be greater than 0");
        }

        if args.reply_timeout_ms == 0 {
            bail!("REPLY_TIMEOUT_MS must be greater than 0");
        }

        if args.max_concurrent_requests == 0 {
            bail!("MAX_CONCURRENT_REQUESTS must be greater than 0");
        }

        if args.job_topic.is_empty() {
            bail!("JOB_TOPIC must not be empty");
        }

        let bus: BusEndpoint = args.bus_url.parse().context("invalid BUS_URL")?;

        if args.embedded_worker && bus != BusEndpoint::Memory {
            bail!("EMBEDDED_WORKER requires BUS_URL=memory://");
        }

        Ok(Self {
            server_addr: args.server_addr,
            bus,
            job_topic: args.job_topic,
            capacity: args.capacity,
            reply_timeout: Duration::from_millis(args.reply_timeout_ms),
            max_concurrent_requests: args.max_concurrent_requests,
            request_body_limit_bytes: args.request_body_limit_bytes,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            embedded_worker: args.embedded_worker,
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(
            ["genbroker-server"].into_iter().chain(extra.iter().copied()),
        )?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn explicit_flags_are_applied() {
        let config = parse(&[
            "--bus-url",
            "memory://",
            "--capacity",
            "4",
            "--reply-timeout-ms",
            "1500",
            "--embedded-worker",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(config.bus, BusEndpoint::Memory);
        assert_eq!(config.capacity, 4);
        assert_eq!(config.reply_timeout, Duration::from_millis(1500));
        assert!(config.embedded_worker);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_degenerate_limits() {
        assert!(parse(&["--bus-url", "memory://", "--capacity", "0"]).is_err());
        assert!(parse(&["--bus-url", "memory://", "--reply-timeout-ms", "0"]).is_err());
        assert!(parse(&["--bus-url", "memory://", "--max-concurrent-requests", "0"]).is_err());
        assert!(parse(&["--bus-url", "memory://", "--job-topic", ""]).is_err());
    }

    #[test]
    fn rejects_unknown_bus_and_misplaced_worker() {
        assert!(parse(&["--bus-url", "kafka://broker:9092"]).is_err());
        assert!(parse(&["--bus-url", "redis://127.0.0.1:6379/0", "--embedded-worker"]).is_err());
    }
}

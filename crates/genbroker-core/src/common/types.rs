//! # Identifiers and protocol constants
//!
//! Everything the broker and its workers must agree on without exchanging
//! configuration lives here: the job identifier, the default topic name, the
//! wire schema version and the token limits enforced by the validator.
//!
//! ## Job identifiers
//!
//! A [`JobId`] is a 128-bit random token (UUID v4). The reply topic for a job
//! is derived from the id alone, so two jobs can only share a reply channel if
//! their ids collide.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic every worker subscribes to for new jobs.
pub const DEFAULT_JOB_TOPIC: &str = "query";

/// Default number of jobs allowed in flight at once.
pub const DEFAULT_CAPACITY: usize = 32;

/// `max_new_tokens` used when the caller does not set one.
pub const DEFAULT_MAX_NEW_TOKENS: i64 = 20;

/// Hard ceiling on `max_new_tokens`.
pub const MAX_NEW_TOKENS_LIMIT: i64 = 512;

/// Schema version stamped on every [`JobEnvelope`](crate::JobEnvelope).
pub const ENVELOPE_VERSION: u32 = 1;

/// Opaque, globally unique identifier of a single generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Draws a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Name of the topic the reply for this job is published on.
    pub fn reply_topic(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

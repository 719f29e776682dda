//! # Bus wire format
//!
//! Jobs and replies travel over the bus as JSON documents. Both broker and
//! worker may be implemented independently, so the schema is explicit and
//! versioned rather than tied to any language's object serialization.
//!
//! ## Job envelope
//!
//! Published on the shared job topic:
//!
//! ```json
//! { "version": 1, "id": "…", "reply_to": "…", "inputs": "…", "parameters": { … } }
//! ```
//!
//! ## Reply envelope
//!
//! Published exactly once on the job's `reply_to` topic, carrying either
//! `output` or `error`. `version` and `id` are optional so that minimal
//! workers can reply with `{ "output": "…" }` alone. When both `output` and
//! `error` are set, `error` wins.

use crate::{
    Error, GenerationParameters, JobId, Result, ValidatedJob, types::ENVELOPE_VERSION,
};
use serde::{Deserialize, Serialize};

/// A job as published on the job topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub version: u32,
    pub id: JobId,
    pub reply_to: String,
    pub inputs: String,
    pub parameters: GenerationParameters,
}

impl JobEnvelope {
    pub fn new(id: JobId, job: ValidatedJob) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            id,
            reply_to: id.reply_topic(),
            inputs: job.inputs,
            parameters: job.parameters,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::transport(format!("encode job: {e}")))
    }

    /// Decodes a job, rejecting schema versions this build does not speak.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(payload)
            .map_err(|e| Error::transport(format!("decode job: {e}")))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(Error::transport(format!(
                "unsupported job envelope version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }
}

/// A reply as published on a job's reply topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyEnvelope {
    pub fn output(id: JobId, output: impl Into<String>) -> Self {
        Self {
            version: Some(ENVELOPE_VERSION),
            id: Some(id),
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn error(id: JobId, error: impl Into<String>) -> Self {
        Self {
            version: Some(ENVELOPE_VERSION),
            id: Some(id),
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::transport(format!("encode reply: {e}")))
    }

    /// Decodes a reply. A missing `version` is accepted; any other version
    /// than the one this build speaks is rejected.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(payload)
            .map_err(|e| Error::transport(format!("decode reply: {e}")))?;
        match envelope.version {
            Some(version) if version != ENVELOPE_VERSION => Err(Error::transport(format!(
                "unsupported reply envelope version {version}"
            ))),
            _ => Ok(envelope),
        }
    }

    /// Interprets the envelope as the reply to job `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the envelope names a different job or
    /// carries neither `output` nor `error`.
    pub fn into_reply(self, expected: JobId) -> Result<Reply> {
        if let Some(id) = self.id {
            if id != expected {
                return Err(Error::transport(format!(
                    "reply for job {id} arrived on the channel of job {expected}"
                )));
            }
        }
        match (self.output, self.error) {
            (_, Some(error)) => Ok(Reply::Failure {
                id: expected,
                error,
            }),
            (Some(output), None) => Ok(Reply::Success {
                id: expected,
                output,
            }),
            (None, None) => Err(Error::transport(format!(
                "reply for job {expected} carried neither output nor error"
            ))),
        }
    }
}

/// The single outcome a worker reports for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success { id: JobId, output: String },
    Failure { id: JobId, error: String },
}

impl Reply {
    pub const fn id(&self) -> JobId {
        match self {
            Self::Success { id, .. } | Self::Failure { id, .. } => *id,
        }
    }

    /// Converts a worker failure into [`Error::WorkerReported`].
    pub fn into_result(self) -> Result<String> {
        match self {
            Self::Success { output, .. } => Ok(output),
            Self::Failure { error, .. } => Err(Error::WorkerReported { message: error }),
        }
    }
}

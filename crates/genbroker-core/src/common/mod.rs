pub mod envelope;
pub mod error;
pub mod params;
pub mod types;

pub use envelope::{JobEnvelope, Reply, ReplyEnvelope};
pub use error::{Error, Result, ValidationError, ValidationErrorKind};
pub use params::{GenerateRequest, GenerationParameters, ValidatedJob, validate_parameters};
pub use types::JobId;

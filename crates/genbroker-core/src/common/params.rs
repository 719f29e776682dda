//! Request parsing and generation parameter validation.
//!
//! Validation is a pure function of the request body. Rules run in a fixed
//! order (`temperature`, `top_k`, `top_p`, `max_new_tokens`, `do_sample`) and
//! the first failing rule determines the error. Out-of-range values are
//! rejected, never clamped.
//!
//! The raw body is kept as [`serde_json::Value`] until validation so that a
//! mistyped field (`"temperature": "hot"`) is reported against that field
//! rather than as a generic deserialization failure.

use crate::{
    ValidationError, ValidationErrorKind,
    types::{DEFAULT_MAX_NEW_TOKENS, MAX_NEW_TOKENS_LIMIT},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a `POST /generate` request, before validation.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub inputs: Option<Value>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

/// Normalized generation options forwarded to workers.
///
/// Unset optional fields serialize as `null` so that workers always see the
/// full set of keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub do_sample: Option<bool>,
    pub temperature: Option<f64>,
    pub top_k: Option<u64>,
    pub top_p: Option<f64>,
    pub max_new_tokens: i64,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            do_sample: None,
            temperature: None,
            top_k: None,
            top_p: None,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }
}

/// A request that passed validation and may be admitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedJob {
    pub inputs: String,
    pub parameters: GenerationParameters,
}

impl GenerateRequest {
    pub fn new(inputs: impl Into<String>) -> Self {
        Self {
            inputs: Some(Value::String(inputs.into())),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Checks the parameters, then the input text.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn validate(&self) -> Result<ValidatedJob, ValidationError> {
        let parameters = match &self.parameters {
            None => GenerationParameters::default(),
            Some(Value::Object(raw)) => validate_parameters(raw)?,
            Some(_) => {
                return Err(ValidationError::new(
                    ValidationErrorKind::InvalidParameters,
                    "`parameters` must be an object",
                ));
            }
        };

        let inputs = match &self.inputs {
            Some(Value::String(text)) => text.clone(),
            _ => {
                return Err(ValidationError::new(
                    ValidationErrorKind::MissingInput,
                    "`inputs` is required",
                ));
            }
        };

        Ok(ValidatedJob { inputs, parameters })
    }
}

/// Validates and normalizes a raw parameter mapping.
///
/// Keys other than the five known options are ignored. A key whose value is
/// `null` is treated as absent.
///
/// # Errors
///
/// Returns a [`ValidationError`] for the first rule that fails.
pub fn validate_parameters(raw: &Map<String, Value>) -> Result<GenerationParameters, ValidationError> {
    let temperature = match present(raw, "temperature") {
        None => None,
        Some(value) => Some(value.as_f64().filter(|t| *t > 0.0).ok_or_else(|| {
            ValidationError::new(
                ValidationErrorKind::InvalidTemperature,
                "Temperature needs to be >0",
            )
        })?),
    };

    let top_k = match present(raw, "top_k") {
        None => None,
        Some(value) => Some(value.as_u64().filter(|k| *k > 0).ok_or_else(|| {
            ValidationError::new(ValidationErrorKind::InvalidTopK, "top_k is an integer > 0")
        })?),
    };

    let top_p = match present(raw, "top_p") {
        None => None,
        Some(value) => Some(
            value
                .as_f64()
                .filter(|p| *p > 0.0 && *p <= 1.0)
                .ok_or_else(|| {
                    ValidationError::new(
                        ValidationErrorKind::InvalidTopP,
                        "top_p is a float > 0 and <=1",
                    )
                })?,
        ),
    };

    let max_new_tokens = match present(raw, "max_new_tokens") {
        None => DEFAULT_MAX_NEW_TOKENS,
        Some(value) => match value.as_i64() {
            Some(n) => n,
            // Integers past i64::MAX are well over the limit.
            None if value.as_u64().is_some() => return Err(token_limit_exceeded()),
            None => {
                return Err(ValidationError::new(
                    ValidationErrorKind::InvalidMaxNewTokens,
                    "max_new_tokens is an integer",
                ));
            }
        },
    };
    if max_new_tokens > MAX_NEW_TOKENS_LIMIT {
        return Err(token_limit_exceeded());
    }

    let do_sample = match present(raw, "do_sample") {
        None => None,
        Some(value) => Some(value.as_bool().ok_or_else(|| {
            ValidationError::new(ValidationErrorKind::InvalidDoSample, "do_sample is a boolean")
        })?),
    };

    Ok(GenerationParameters {
        do_sample,
        temperature,
        top_k,
        top_p,
        max_new_tokens,
    })
}

fn present<'a>(raw: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|value| !value.is_null())
}

fn token_limit_exceeded() -> ValidationError {
    ValidationError::new(
        ValidationErrorKind::TokenLimitExceeded,
        format!("You cannot generate more than {MAX_NEW_TOKENS_LIMIT} new tokens"),
    )
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use genbroker_core::Error;
use serde_json::json;

/// Error returned from HTTP handlers, rendered as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    /// The broker rejected or failed the request.
    Broker(Error),
    /// The body could not be read as a generation request.
    MalformedBody(String),
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Broker(err) => match err {
                Error::Validation(_) | Error::WorkerReported { .. } => StatusCode::BAD_REQUEST,
                Error::CapacityExceeded | Error::ServiceShutdown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                Error::Transport { .. } => StatusCode::BAD_GATEWAY,
            },
            Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Broker(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::Broker(err) => {
                if let Error::Transport { context } = &err {
                    tracing::error!(%context, "Bus transport failure");
                }
                err.to_string()
            }
            Self::MalformedBody(reason) => reason,
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

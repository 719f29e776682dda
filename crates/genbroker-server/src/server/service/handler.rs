use super::error::ApiError;
use crate::server::broker::Broker;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use genbroker_core::GenerateRequest;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct GeneratedText {
    pub generated_text: String,
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub in_flight: usize,
    pub capacity: usize,
}

/// `POST /generate`
///
/// Responds with a one-element array, `[{"generated_text": ...}]`.
pub async fn generate(
    State(broker): State<Broker>,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<Vec<GeneratedText>>, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        tracing::warn!(status = %rejection.status(), "Rejected request body: {}", rejection.body_text());
        ApiError::MalformedBody(rejection.body_text())
    })?;

    let generated_text = broker.generate(&request).await?;
    Ok(Json(vec![GeneratedText { generated_text }]))
}

/// `GET /health`
pub async fn health(State(broker): State<Broker>) -> Json<Health> {
    let admission = broker.admission();
    Json(Health {
        status: "ok",
        in_flight: admission.in_flight(),
        capacity: admission.capacity(),
    })
}

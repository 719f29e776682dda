//! HTTP surface of the broker.
//!
//! ## Structure
//!
//! - [`handler`] - `POST /generate` and `GET /health`.
//! - [`error`] - mapping of broker errors onto HTTP responses.
//! - [`router`] - the axum [`Router`](axum::Router) with its tower layers.

pub mod error;
pub mod handler;
pub mod router;

//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;
use worldgate_core::FetchError;

/// An error returned by an API handler.
///
/// Only [`BadRequest`](Self::BadRequest) and [`NotFound`](Self::NotFound)
/// carry their message to the client; internal failures are logged and
/// answered with a generic body.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("world links are not synchronized yet")]
  NotSynced,

  #[error("subscriber {0} is already polling")]
  Busy(String),

  /// A long-poll ended without an event.
  #[error("no update before the poll timed out")]
  PollTimeout,

  #[error("upstream error: {0}")]
  Upstream(String),

  #[error("timed out: {0}")]
  Timeout(&'static str),

  #[error("internal error: {0}")]
  Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<worldgate_verify::Error> for ApiError {
  fn from(e: worldgate_verify::Error) -> Self {
    use worldgate_verify::Error as E;
    match e {
      E::Rejected(msg) => Self::BadRequest(msg),
      E::NotFound(what) => Self::NotFound(format!("{what} not found")),
      E::Busy(id) => Self::Busy(id),
      E::Timeout(what) => Self::Timeout(what),
      E::Core(worldgate_core::Error::WorldLinksNotSynced) => Self::NotSynced,
      E::Core(worldgate_core::Error::UnknownWorld(w)) => {
        Self::NotFound(format!("world {w} not found"))
      }
      E::Fetch(FetchError::RateLimited) => Self::Upstream("remote api rate limit".into()),
      E::Fetch(f) => Self::Upstream(f.to_string()),
      E::Store(source) => Self::Internal(source),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::NotSynced => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
      ApiError::Busy(_) => (StatusCode::CONFLICT, self.to_string()),
      ApiError::PollTimeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
      ApiError::Upstream(detail) => {
        error!(error = %detail, "remote api call failed");
        (StatusCode::BAD_GATEWAY, "remote api unavailable".to_owned())
      }
      ApiError::Timeout(what) => {
        error!(operation = what, "operation timed out");
        (StatusCode::GATEWAY_TIMEOUT, "operation timed out".to_owned())
      }
      ApiError::Internal(e) => {
        error!(error = %e, "internal error");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_owned())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}

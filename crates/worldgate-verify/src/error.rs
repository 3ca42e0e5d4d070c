//! Error type for `worldgate-verify`.

use std::{future::Future, time::Duration};

use thiserror::Error;
use worldgate_core::{FetchError, Restriction};

#[derive(Debug, Error)]
pub enum Error {
  #[error("store error: {0}")]
  Store(Box<dyn std::error::Error + Send + Sync>),

  #[error("fetch error: {0}")]
  Fetch(#[from] FetchError),

  #[error("timed out: {0}")]
  Timeout(&'static str),

  /// Includes the world-links-not-synchronised sentinel.
  #[error(transparent)]
  Core(#[from] worldgate_core::Error),

  #[error("not found: {0}")]
  NotFound(String),

  /// A policy rejection. The description is safe to show to end users.
  #[error("rejected: {0}")]
  Rejected(String),

  /// The subscriber already has a poll outstanding.
  #[error("subscriber {0} is already polling")]
  Busy(String),
}

impl Error {
  pub fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }

  pub fn is_not_synced(&self) -> bool {
    matches!(self, Self::Core(worldgate_core::Error::WorldLinksNotSynced))
  }

  /// The message an end user may see, if any. Internal failures have none.
  pub fn user_message(&self) -> Option<&str> {
    match self {
      Self::Rejected(msg) => Some(msg),
      _ => None,
    }
  }
}

impl From<Restriction> for Error {
  fn from(r: Restriction) -> Self { Self::Rejected(r.description) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Run a store call under `deadline`.
pub(crate) async fn store_call<T, E, F>(
  deadline: Duration,
  what: &'static str,
  fut: F,
) -> Result<T>
where
  F: Future<Output = std::result::Result<T, E>>,
  E: std::error::Error + Send + Sync + 'static,
{
  match tokio::time::timeout(deadline, fut).await {
    Ok(result) => result.map_err(Error::store),
    Err(_) => Err(Error::Timeout(what)),
  }
}

/// Run a remote fetch under `deadline`.
pub(crate) async fn fetch_call<T, F>(
  deadline: Duration,
  what: &'static str,
  fut: F,
) -> Result<T>
where
  F: Future<Output = std::result::Result<T, FetchError>>,
{
  match tokio::time::timeout(deadline, fut).await {
    Ok(result) => Ok(result?),
    Err(_) => Err(Error::Timeout(what)),
  }
}

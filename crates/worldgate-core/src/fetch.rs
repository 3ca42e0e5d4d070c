//! The remote account-data API, as seen by the rest of the workspace.
//!
//! The [`AccountFetcher`] trait is implemented by `worldgate-gw2api`; tests
//! use in-memory fakes. Payload types mirror the wire format closely and are
//! translated into the persisted model by the synchroniser.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::world::WorldId;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
  /// The remote API rejected the credential itself. Recoverable only by the
  /// user supplying a new key.
  #[error("invalid api key")]
  InvalidKey,

  #[error("rate limited by remote api")]
  RateLimited,

  #[error("remote api returned {0}: {1}")]
  Status(u16, String),

  #[error("transport error: {0}")]
  Transport(String),

  #[error("could not decode remote response: {0}")]
  Decode(String),
}

impl FetchError {
  pub fn is_invalid_key(&self) -> bool { matches!(self, Self::InvalidKey) }
}

// ─── Payloads ────────────────────────────────────────────────────────────────

/// `/v2/tokeninfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTokenInfo {
  pub id:          String,
  #[serde(default)]
  pub name:        String,
  #[serde(default)]
  pub permissions: Vec<String>,
}

/// Competitive team membership embedded in `/v2/account`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccountWvwSummary {
  #[serde(default)]
  pub team_id: Option<i32>,
  #[serde(default)]
  pub rank:    Option<i32>,
}

/// `/v2/account`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAccount {
  pub id:        String,
  pub name:      String,
  pub world:     WorldId,
  #[serde(default)]
  pub age:       i64,
  #[serde(default)]
  pub access:    Vec<String>,
  #[serde(default)]
  pub commander: bool,
  #[serde(default)]
  pub wvw_rank:  Option<i32>,
  #[serde(default)]
  pub guilds:    Vec<String>,
  #[serde(default)]
  pub created:   Option<DateTime<Utc>>,
  #[serde(default)]
  pub wvw:       Option<RemoteAccountWvwSummary>,
}

impl RemoteAccount {
  /// Competitive rank, preferring the legacy top-level field when present.
  pub fn effective_wvw_rank(&self) -> i32 {
    self
      .wvw_rank
      .or_else(|| self.wvw.as_ref().and_then(|w| w.rank))
      .unwrap_or(0)
  }
}

/// `/v2/account/wvw`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWvw {
  #[serde(default)]
  pub team:  Option<i32>,
  #[serde(default)]
  pub guild: Option<String>,
}

/// One entry of `/v2/account/achievements`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAchievement {
  pub id:      i32,
  #[serde(default)]
  pub current: i64,
}

/// `/v2/characters/{name}/core`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCharacter {
  pub name:  String,
  #[serde(default)]
  pub level: i32,
  /// Seconds played on this character.
  #[serde(default)]
  pub age:   i64,
}

/// Per-faction world lists of a matchup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchupWorlds {
  #[serde(default)]
  pub red:   Vec<WorldId>,
  #[serde(default)]
  pub blue:  Vec<WorldId>,
  #[serde(default)]
  pub green: Vec<WorldId>,
}

impl MatchupWorlds {
  pub fn sides(&self) -> [&[WorldId]; 3] {
    [&self.red, &self.blue, &self.green]
  }
}

/// One entry of `/v2/wvw/matches?ids=all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matchup {
  pub id:       String,
  pub end_time: DateTime<Utc>,
  #[serde(rename = "all_worlds")]
  pub worlds:   MatchupWorlds,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Read-only access to the remote account-data API.
///
/// Every call that takes an `api_key` authenticates with it; implementations
/// must map an authentication rejection to [`FetchError::InvalidKey`].
pub trait AccountFetcher: Send + Sync {
  fn token_info<'a>(
    &'a self,
    api_key: &'a str,
  ) -> impl Future<Output = Result<RemoteTokenInfo, FetchError>> + Send + 'a;

  fn account<'a>(
    &'a self,
    api_key: &'a str,
  ) -> impl Future<Output = Result<RemoteAccount, FetchError>> + Send + 'a;

  fn account_wvw<'a>(
    &'a self,
    api_key: &'a str,
  ) -> impl Future<Output = Result<RemoteWvw, FetchError>> + Send + 'a;

  fn account_achievements<'a>(
    &'a self,
    api_key: &'a str,
    ids: &'a [i32],
  ) -> impl Future<Output = Result<Vec<RemoteAchievement>, FetchError>> + Send + 'a;

  /// Names of every character on the account.
  fn characters<'a>(
    &'a self,
    api_key: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, FetchError>> + Send + 'a;

  fn character_core<'a>(
    &'a self,
    api_key: &'a str,
    name: &'a str,
  ) -> impl Future<Output = Result<RemoteCharacter, FetchError>> + Send + 'a;

  /// Current competitive matchups. Unauthenticated.
  fn wvw_matches(
    &self,
  ) -> impl Future<Output = Result<Vec<Matchup>, FetchError>> + Send + '_;
}

//! The `VerifyStore` trait and supporting input types.
//!
//! The trait is implemented by storage backends (e.g.
//! `worldgate-store-sqlite`). The runtime services in `worldgate-verify`
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
  model::{
    Account, Ban, EphemeralAssociation, PlatformId, PlatformLink, TokenInfo,
    User, UserView,
  },
  world::WorldId,
};

// ─── Input types ─────────────────────────────────────────────────────────────

/// Everything written when a user links a new API key.
#[derive(Debug, Clone)]
pub struct NewApiKey {
  pub platform_id:      PlatformId,
  pub platform_user_id: String,
  pub primary:          bool,
  /// `user_id` is ignored; the account is owned by the platform identity's
  /// user, created if necessary.
  pub account:          Account,
  pub token:            TokenInfo,
}

/// Parameters for [`VerifyStore::find_stale_token`].
#[derive(Debug, Clone, Copy)]
pub struct StaleQuery {
  /// A credential is live while its last success lies within this window of
  /// its last attempt.
  pub freshness: Duration,
  /// Dead credentials become due once more after this long, so they are
  /// either revived or purged. `None` parks them forever.
  pub retention: Option<Duration>,
  pub now:       DateTime<Utc>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the verification store backend.
///
/// Methods that touch more than one table run in a single transaction: a
/// failure leaves no partial write observable.
pub trait VerifyStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Users and platform identities ─────────────────────────────────────

  /// Get or create the user behind a platform identity.
  ///
  /// When `primary` is set, any prior primary link of that user on the same
  /// platform is removed before the link is upserted.
  fn link_platform_user(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
    primary: bool,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  fn get_platform_link(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
  ) -> impl Future<Output = Result<Option<PlatformLink>, Self::Error>> + Send + '_;

  /// Assemble the full [`UserView`]. Returns `None` if the user does not
  /// exist. The derived `expired` flag of each account is left unset.
  fn get_user(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Option<UserView>, Self::Error>> + Send + '_;

  /// [`get_user`](Self::get_user) by platform identity.
  fn get_platform_user(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
  ) -> impl Future<Output = Result<Option<UserView>, Self::Error>> + Send + '_;

  // ── Credentials ───────────────────────────────────────────────────────

  /// Link a platform identity, upsert its account and upsert the credential,
  /// all in one transaction. Returns the owning user.
  fn save_api_key(
    &self,
    input: NewApiKey,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  /// The credential most in need of a sync among the live ones and the dead
  /// ones past retention: never-attempted first, then the oldest last
  /// attempt. `None` if there is none.
  fn find_stale_token(
    &self,
    query: StaleQuery,
  ) -> impl Future<Output = Result<Option<TokenInfo>, Self::Error>> + Send + '_;

  /// Every credential of every account owned by `user_id`.
  fn user_tokens(
    &self,
    user_id: Uuid,
  ) -> impl Future<Output = Result<Vec<TokenInfo>, Self::Error>> + Send + '_;

  fn mark_token_attempt(
    &self,
    token_id: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn mark_token_success(
    &self,
    token_id: String,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Overwrite the credential's account id, name and permissions.
  fn update_token_info(
    &self,
    token: TokenInfo,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Number of live credentials of `account_id` other than `excluding`.
  fn count_live_tokens(
    &self,
    account_id: String,
    freshness: Duration,
    excluding: String,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Delete a credential and, when `account_id` is given, the account and
  /// its achievement counters. One transaction.
  fn purge_credential(
    &self,
    token_id: String,
    account_id: Option<String>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Accounts ──────────────────────────────────────────────────────────

  fn get_account(
    &self,
    account_id: String,
  ) -> impl Future<Output = Result<Option<Account>, Self::Error>> + Send + '_;

  /// Insert or replace an account snapshot.
  fn save_account(
    &self,
    account: Account,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Insert or update one progress counter.
  fn record_achievement(
    &self,
    account_id: String,
    achievement_id: i32,
    current: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Bans and temporary grants ─────────────────────────────────────────

  fn add_ban(
    &self,
    user_id: Uuid,
    reason: String,
    until: DateTime<Utc>,
  ) -> impl Future<Output = Result<Ban, Self::Error>> + Send + '_;

  /// Link the platform identity as primary and record a grant for its user,
  /// in one transaction.
  fn grant_ephemeral(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
    world: WorldId,
    until: DateTime<Utc>,
  ) -> impl Future<Output = Result<(User, EphemeralAssociation), Self::Error>>
  + Send
  + '_;
}

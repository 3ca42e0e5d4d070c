//! Persisted entities: users, their platform identities, synchronised game
//! accounts, credentials, bans and temporary world grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{status::Status, world::WorldId};

/// Identifier of an external platform (a chat service, a forum, ...).
pub type PlatformId = i32;

// ─── Identity ────────────────────────────────────────────────────────────────

/// The internal identity that owns accounts, bans and grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  pub user_id:    Uuid,
  pub created_at: DateTime<Utc>,
}

/// One external platform identity bound to a [`User`].
///
/// `(platform_id, platform_user_id)` is unique. At most one link per
/// `(user_id, platform_id)` is primary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformLink {
  pub platform_id:      PlatformId,
  pub platform_user_id: String,
  pub user_id:          Uuid,
  pub primary:          bool,
  pub linked_at:        DateTime<Utc>,
}

// ─── Accounts and credentials ────────────────────────────────────────────────

/// A synchronised snapshot of one remote game account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
  pub account_id:   String,
  pub user_id:      Uuid,
  pub name:         String,
  pub world:        WorldId,
  /// Seconds played across the account.
  pub age_secs:     i64,
  pub access:       Vec<String>,
  pub commander:    bool,
  pub wvw_rank:     i32,
  pub wvw_team_id:  Option<i32>,
  pub wvw_guild_id: Option<String>,
  pub guilds:       Vec<String>,
  pub created:      Option<DateTime<Utc>>,
  /// When this snapshot was last written.
  pub synced_at:    DateTime<Utc>,
  /// Most recent successful sync across every credential of this account.
  /// Filled in by the store on read.
  #[serde(default)]
  pub last_credential_success: Option<DateTime<Utc>>,
  /// Derived on read from the freshness window; never persisted.
  #[serde(default)]
  pub expired:      bool,
}

impl Account {
  /// Paid expansions are not owned; only the free base game is.
  pub fn is_free_to_play(&self) -> bool {
    is_free_to_play(&self.access)
  }
}

pub fn is_free_to_play(access: &[String]) -> bool {
  let has = |tag: &str| access.iter().any(|a| a == tag);
  has("PlayForFree") && !has("GuildWars2")
}

/// An API key and its metadata. Many credentials may point at one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
  pub token_id:     String,
  /// Unknown until the first successful token-info fetch.
  pub account_id:   Option<String>,
  #[serde(default, skip_serializing)]
  pub api_key:      String,
  pub name:         String,
  pub permissions:  Vec<String>,
  pub last_attempt: Option<DateTime<Utc>>,
  pub last_success: Option<DateTime<Utc>>,
}

impl TokenInfo {
  pub fn has_permission(&self, permission: &str) -> bool {
    self.permissions.iter().any(|p| p == permission)
  }

  /// Whether the credential is still considered working.
  ///
  /// A credential that has never succeeded is live until proven otherwise.
  /// Otherwise its last success must lie within `window` of its last attempt.
  pub fn is_live(&self, window: chrono::Duration) -> bool {
    match (self.last_success, self.last_attempt) {
      (None, _) => true,
      (Some(_), None) => true,
      (Some(success), Some(attempt)) => attempt
        .checked_sub_signed(window)
        .is_none_or(|floor| success >= floor),
    }
  }
}

// ─── Sanctions and grants ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
  pub ban_id:     Uuid,
  pub user_id:    Uuid,
  pub reason:     String,
  pub until:      DateTime<Utc>,
  pub created_at: DateTime<Utc>,
}

impl Ban {
  pub fn is_active(&self, now: DateTime<Utc>) -> bool { self.until > now }
}

/// A time-boxed world assignment independent of any game account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralAssociation {
  pub association_id: Uuid,
  pub user_id:        Uuid,
  pub world:          WorldId,
  pub until:          DateTime<Utc>,
  pub created_at:     DateTime<Utc>,
}

impl EphemeralAssociation {
  pub fn is_active(&self, now: DateTime<Utc>) -> bool { now < self.until }
}

// ─── Aggregates ──────────────────────────────────────────────────────────────

/// Everything known about a user, assembled on read.
///
/// This is the snapshot the resolver evaluates and the emitter diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
  pub user:                   User,
  pub platform_links:         Vec<PlatformLink>,
  pub accounts:               Vec<Account>,
  pub bans:                   Vec<Ban>,
  pub ephemeral_associations: Vec<EphemeralAssociation>,
}

impl UserView {
  pub fn new(user: User) -> Self {
    Self {
      user,
      platform_links: Vec::new(),
      accounts: Vec::new(),
      bans: Vec::new(),
      ephemeral_associations: Vec::new(),
    }
  }

  pub fn user_id(&self) -> Uuid { self.user.user_id }

  /// The active ban with the furthest expiry, if any.
  pub fn active_ban(&self, now: DateTime<Utc>) -> Option<&Ban> {
    self
      .bans
      .iter()
      .filter(|b| b.is_active(now))
      .max_by_key(|b| b.until)
  }

  /// The user's identity on `platform_id`, preferring the primary link.
  pub fn link_on(&self, platform_id: PlatformId) -> Option<&PlatformLink> {
    self
      .platform_links
      .iter()
      .filter(|l| l.platform_id == platform_id)
      .max_by_key(|l| l.primary)
  }

  pub fn active_ephemerals(
    &self,
    now: DateTime<Utc>,
  ) -> impl Iterator<Item = &EphemeralAssociation> + '_ {
    self
      .ephemeral_associations
      .iter()
      .filter(move |e| e.is_active(now))
  }
}

/// A personalised status change delivered to a status subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationUpdate {
  pub user_id:       Uuid,
  pub status:        Status,
  pub ban:           Option<Ban>,
  /// The user's identity on the subscriber's platform, when scoped.
  pub platform_link: Option<PlatformLink>,
}

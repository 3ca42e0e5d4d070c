//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are fixed-width RFC 3339 strings. String lists (access tags,
//! guilds, permissions) are stored as compact JSON arrays. UUIDs are stored
//! as hyphenated lowercase strings.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;
use worldgate_core::model::{
  Account, Ban, EphemeralAssociation, PlatformLink, TokenInfo, User,
};

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

pub fn encode_list(items: &[String]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

pub fn decode_list(s: &str) -> Result<Vec<String>> { Ok(serde_json::from_str(s)?) }

/// Duration as fractional days, the unit of SQLite's `julianday()`.
pub fn duration_days(d: chrono::Duration) -> f64 {
  d.num_milliseconds() as f64 / 86_400_000.0
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const USER_COLUMNS: &str = "user_id, created_at";

/// Raw strings read directly from a `users` row.
pub struct RawUser {
  pub user_id:    String,
  pub created_at: String,
}

impl RawUser {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self { user_id: r.get(0)?, created_at: r.get(1)? })
  }

  pub fn into_user(self) -> Result<User> {
    Ok(User {
      user_id:    decode_uuid(&self.user_id)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub const LINK_COLUMNS: &str =
  "platform_id, platform_user_id, user_id, is_primary, linked_at";

pub struct RawPlatformLink {
  pub platform_id:      i32,
  pub platform_user_id: String,
  pub user_id:          String,
  pub primary:          bool,
  pub linked_at:        String,
}

impl RawPlatformLink {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      platform_id:      r.get(0)?,
      platform_user_id: r.get(1)?,
      user_id:          r.get(2)?,
      primary:          r.get(3)?,
      linked_at:        r.get(4)?,
    })
  }

  pub fn into_link(self) -> Result<PlatformLink> {
    Ok(PlatformLink {
      platform_id:      self.platform_id,
      platform_user_id: self.platform_user_id,
      user_id:          decode_uuid(&self.user_id)?,
      primary:          self.primary,
      linked_at:        decode_dt(&self.linked_at)?,
    })
  }
}

/// Account columns plus the most recent credential success, aliased `a` and
/// joined against `token_infos`.
pub const ACCOUNT_SELECT: &str = "
  SELECT a.account_id, a.user_id, a.name, a.world, a.age_secs, a.access,
         a.commander, a.wvw_rank, a.wvw_team_id, a.wvw_guild_id, a.guilds,
         a.created, a.synced_at,
         (SELECT MAX(t.last_success) FROM token_infos t
           WHERE t.account_id = a.account_id)
    FROM accounts a";

pub struct RawAccount {
  pub account_id:   String,
  pub user_id:      String,
  pub name:         String,
  pub world:        i32,
  pub age_secs:     i64,
  pub access:       String,
  pub commander:    bool,
  pub wvw_rank:     i32,
  pub wvw_team_id:  Option<i32>,
  pub wvw_guild_id: Option<String>,
  pub guilds:       String,
  pub created:      Option<String>,
  pub synced_at:    String,
  pub last_success: Option<String>,
}

impl RawAccount {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      account_id:   r.get(0)?,
      user_id:      r.get(1)?,
      name:         r.get(2)?,
      world:        r.get(3)?,
      age_secs:     r.get(4)?,
      access:       r.get(5)?,
      commander:    r.get(6)?,
      wvw_rank:     r.get(7)?,
      wvw_team_id:  r.get(8)?,
      wvw_guild_id: r.get(9)?,
      guilds:       r.get(10)?,
      created:      r.get(11)?,
      synced_at:    r.get(12)?,
      last_success: r.get(13)?,
    })
  }

  pub fn into_account(self) -> Result<Account> {
    Ok(Account {
      account_id:   self.account_id,
      user_id:      decode_uuid(&self.user_id)?,
      name:         self.name,
      world:        self.world,
      age_secs:     self.age_secs,
      access:       decode_list(&self.access)?,
      commander:    self.commander,
      wvw_rank:     self.wvw_rank,
      wvw_team_id:  self.wvw_team_id,
      wvw_guild_id: self.wvw_guild_id,
      guilds:       decode_list(&self.guilds)?,
      created:      decode_opt_dt(self.created)?,
      synced_at:    decode_dt(&self.synced_at)?,
      last_credential_success: decode_opt_dt(self.last_success)?,
      expired:      false,
    })
  }
}

pub const TOKEN_COLUMNS: &str = "token_id, account_id, api_key, name, \
                                 permissions, last_attempt, last_success";

pub struct RawTokenInfo {
  pub token_id:     String,
  pub account_id:   Option<String>,
  pub api_key:      String,
  pub name:         String,
  pub permissions:  String,
  pub last_attempt: Option<String>,
  pub last_success: Option<String>,
}

impl RawTokenInfo {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      token_id:     r.get(0)?,
      account_id:   r.get(1)?,
      api_key:      r.get(2)?,
      name:         r.get(3)?,
      permissions:  r.get(4)?,
      last_attempt: r.get(5)?,
      last_success: r.get(6)?,
    })
  }

  pub fn into_token(self) -> Result<TokenInfo> {
    Ok(TokenInfo {
      token_id:     self.token_id,
      account_id:   self.account_id,
      api_key:      self.api_key,
      name:         self.name,
      permissions:  decode_list(&self.permissions)?,
      last_attempt: decode_opt_dt(self.last_attempt)?,
      last_success: decode_opt_dt(self.last_success)?,
    })
  }
}

pub const BAN_COLUMNS: &str = "ban_id, user_id, reason, until, created_at";

pub struct RawBan {
  pub ban_id:     String,
  pub user_id:    String,
  pub reason:     String,
  pub until:      String,
  pub created_at: String,
}

impl RawBan {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      ban_id:     r.get(0)?,
      user_id:    r.get(1)?,
      reason:     r.get(2)?,
      until:      r.get(3)?,
      created_at: r.get(4)?,
    })
  }

  pub fn into_ban(self) -> Result<Ban> {
    Ok(Ban {
      ban_id:     decode_uuid(&self.ban_id)?,
      user_id:    decode_uuid(&self.user_id)?,
      reason:     self.reason,
      until:      decode_dt(&self.until)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub const EPHEMERAL_COLUMNS: &str =
  "association_id, user_id, world, until, created_at";

pub struct RawEphemeral {
  pub association_id: String,
  pub user_id:        String,
  pub world:          i32,
  pub until:          String,
  pub created_at:     String,
}

impl RawEphemeral {
  pub fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      association_id: r.get(0)?,
      user_id:        r.get(1)?,
      world:          r.get(2)?,
      until:          r.get(3)?,
      created_at:     r.get(4)?,
    })
  }

  pub fn into_association(self) -> Result<EphemeralAssociation> {
    Ok(EphemeralAssociation {
      association_id: decode_uuid(&self.association_id)?,
      user_id:        decode_uuid(&self.user_id)?,
      world:          self.world,
      until:          decode_dt(&self.until)?,
      created_at:     decode_dt(&self.created_at)?,
    })
  }
}

/// Every row making up a [`UserView`](worldgate_core::model::UserView),
/// still undecoded.
pub struct RawUserView {
  pub user:       RawUser,
  pub links:      Vec<RawPlatformLink>,
  pub accounts:   Vec<RawAccount>,
  pub bans:       Vec<RawBan>,
  pub ephemerals: Vec<RawEphemeral>,
}

impl RawUserView {
  pub fn into_view(self) -> Result<worldgate_core::model::UserView> {
    Ok(worldgate_core::model::UserView {
      user:                   self.user.into_user()?,
      platform_links:         self
        .links
        .into_iter()
        .map(RawPlatformLink::into_link)
        .collect::<Result<_>>()?,
      accounts:               self
        .accounts
        .into_iter()
        .map(RawAccount::into_account)
        .collect::<Result<_>>()?,
      bans:                   self
        .bans
        .into_iter()
        .map(RawBan::into_ban)
        .collect::<Result<_>>()?,
      ephemeral_associations: self
        .ephemerals
        .into_iter()
        .map(RawEphemeral::into_association)
        .collect::<Result<_>>()?,
    })
  }
}

//! [`SqliteStore`]: the SQLite implementation of [`VerifyStore`].

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension as _};
use uuid::Uuid;

use worldgate_core::{
  model::{
    Account, Ban, EphemeralAssociation, PlatformId, PlatformLink, TokenInfo,
    User, UserView,
  },
  store::{NewApiKey, StaleQuery, VerifyStore},
  world::WorldId,
};

use crate::{
  encode::{
    ACCOUNT_SELECT, BAN_COLUMNS, EPHEMERAL_COLUMNS, LINK_COLUMNS, RawAccount,
    RawBan, RawEphemeral, RawPlatformLink, RawTokenInfo, RawUser, RawUserView,
    TOKEN_COLUMNS, USER_COLUMNS, duration_days, encode_dt, encode_list,
    encode_uuid,
  },
  schema::SCHEMA,
  Result,
};

/// A credential is live if it never succeeded, was never attempted, or its
/// last success lies within `:window` days of its last attempt.
const LIVE_TOKEN: &str = "(last_success IS NULL OR last_attempt IS NULL
  OR julianday(last_success) >= julianday(last_attempt) - :window)";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A verification store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Current value of one achievement counter.
  pub async fn achievement(
    &self,
    account_id: String,
    achievement_id: i32,
  ) -> Result<Option<i64>> {
    let current = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT current FROM account_achievements
                WHERE account_id = ?1 AND achievement_id = ?2",
              rusqlite::params![account_id, achievement_id],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(current)
  }
}

// ─── Synchronous helpers (run on the connection thread) ──────────────────────

/// Get or create the user behind a platform identity and upsert the link.
///
/// Must run inside a transaction: it issues several dependent statements.
fn link_identity(
  conn: &Connection,
  platform_id: PlatformId,
  platform_user_id: &str,
  primary: bool,
  now: &str,
) -> rusqlite::Result<RawUser> {
  let existing: Option<String> = conn
    .query_row(
      "SELECT user_id FROM platform_links
        WHERE platform_id = ?1 AND platform_user_id = ?2",
      rusqlite::params![platform_id, platform_user_id],
      |r| r.get(0),
    )
    .optional()?;

  let user_id = match existing {
    Some(id) => id,
    None => {
      let id = encode_uuid(Uuid::new_v4());
      conn.execute(
        "INSERT INTO users (user_id, created_at) VALUES (?1, ?2)",
        rusqlite::params![id, now],
      )?;
      id
    }
  };

  if primary {
    conn.execute(
      "DELETE FROM platform_links
        WHERE platform_id = ?1 AND user_id = ?2 AND is_primary = 1
          AND platform_user_id != ?3",
      rusqlite::params![platform_id, user_id, platform_user_id],
    )?;
  }

  conn.execute(
    "INSERT INTO platform_links
       (platform_id, platform_user_id, user_id, is_primary, linked_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT (platform_id, platform_user_id) DO UPDATE SET
       user_id    = excluded.user_id,
       is_primary = excluded.is_primary OR platform_links.is_primary",
    rusqlite::params![platform_id, platform_user_id, user_id, primary, now],
  )?;

  conn.query_row(
    &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
    [&user_id],
    RawUser::from_row,
  )
}

fn upsert_account(conn: &Connection, a: &AccountRow) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO accounts (
       account_id, user_id, name, world, age_secs, access, commander,
       wvw_rank, wvw_team_id, wvw_guild_id, guilds, created, synced_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
     ON CONFLICT (account_id) DO UPDATE SET
       user_id      = excluded.user_id,
       name         = excluded.name,
       world        = excluded.world,
       age_secs     = excluded.age_secs,
       access       = excluded.access,
       commander    = excluded.commander,
       wvw_rank     = excluded.wvw_rank,
       wvw_team_id  = excluded.wvw_team_id,
       wvw_guild_id = excluded.wvw_guild_id,
       guilds       = excluded.guilds,
       created      = excluded.created,
       synced_at    = excluded.synced_at",
    rusqlite::params![
      a.account_id,
      a.user_id,
      a.name,
      a.world,
      a.age_secs,
      a.access,
      a.commander,
      a.wvw_rank,
      a.wvw_team_id,
      a.wvw_guild_id,
      a.guilds,
      a.created,
      a.synced_at,
    ],
  )?;
  Ok(())
}

fn upsert_token(conn: &Connection, t: &TokenRow) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO token_infos (
       token_id, account_id, api_key, name, permissions,
       last_attempt, last_success
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT (token_id) DO UPDATE SET
       account_id   = excluded.account_id,
       api_key      = excluded.api_key,
       name         = excluded.name,
       permissions  = excluded.permissions,
       last_attempt = COALESCE(excluded.last_attempt, token_infos.last_attempt),
       last_success = COALESCE(excluded.last_success, token_infos.last_success)",
    rusqlite::params![
      t.token_id,
      t.account_id,
      t.api_key,
      t.name,
      t.permissions,
      t.last_attempt,
      t.last_success,
    ],
  )?;
  Ok(())
}

fn load_view(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<RawUserView>> {
  let Some(user) = conn
    .query_row(
      &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
      [user_id],
      RawUser::from_row,
    )
    .optional()?
  else {
    return Ok(None);
  };

  let links = conn
    .prepare(&format!(
      "SELECT {LINK_COLUMNS} FROM platform_links
        WHERE user_id = ?1 ORDER BY platform_id, linked_at"
    ))?
    .query_map([user_id], RawPlatformLink::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let accounts = conn
    .prepare(&format!(
      "{ACCOUNT_SELECT} WHERE a.user_id = ?1 ORDER BY a.account_id"
    ))?
    .query_map([user_id], RawAccount::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let bans = conn
    .prepare(&format!(
      "SELECT {BAN_COLUMNS} FROM bans WHERE user_id = ?1 ORDER BY until"
    ))?
    .query_map([user_id], RawBan::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let ephemerals = conn
    .prepare(&format!(
      "SELECT {EPHEMERAL_COLUMNS} FROM ephemeral_associations
        WHERE user_id = ?1 ORDER BY until"
    ))?
    .query_map([user_id], RawEphemeral::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  Ok(Some(RawUserView { user, links, accounts, bans, ephemerals }))
}

fn user_id_for(
  conn: &Connection,
  platform_id: PlatformId,
  platform_user_id: &str,
) -> rusqlite::Result<Option<String>> {
  conn
    .query_row(
      "SELECT user_id FROM platform_links
        WHERE platform_id = ?1 AND platform_user_id = ?2",
      rusqlite::params![platform_id, platform_user_id],
      |r| r.get(0),
    )
    .optional()
}

// ─── Encoded write rows ──────────────────────────────────────────────────────

/// An [`Account`] with every column already encoded, ready to move onto the
/// connection thread.
struct AccountRow {
  account_id:   String,
  user_id:      String,
  name:         String,
  world:        WorldId,
  age_secs:     i64,
  access:       String,
  commander:    bool,
  wvw_rank:     i32,
  wvw_team_id:  Option<i32>,
  wvw_guild_id: Option<String>,
  guilds:       String,
  created:      Option<String>,
  synced_at:    String,
}

impl AccountRow {
  fn encode(a: &Account) -> Result<Self> {
    Ok(Self {
      account_id:   a.account_id.clone(),
      user_id:      encode_uuid(a.user_id),
      name:         a.name.clone(),
      world:        a.world,
      age_secs:     a.age_secs,
      access:       encode_list(&a.access)?,
      commander:    a.commander,
      wvw_rank:     a.wvw_rank,
      wvw_team_id:  a.wvw_team_id,
      wvw_guild_id: a.wvw_guild_id.clone(),
      guilds:       encode_list(&a.guilds)?,
      created:      a.created.map(encode_dt),
      synced_at:    encode_dt(a.synced_at),
    })
  }
}

struct TokenRow {
  token_id:     String,
  account_id:   Option<String>,
  api_key:      String,
  name:         String,
  permissions:  String,
  last_attempt: Option<String>,
  last_success: Option<String>,
}

impl TokenRow {
  fn encode(t: &TokenInfo) -> Result<Self> {
    Ok(Self {
      token_id:     t.token_id.clone(),
      account_id:   t.account_id.clone(),
      api_key:      t.api_key.clone(),
      name:         t.name.clone(),
      permissions:  encode_list(&t.permissions)?,
      last_attempt: t.last_attempt.map(encode_dt),
      last_success: t.last_success.map(encode_dt),
    })
  }
}

// ─── VerifyStore impl ────────────────────────────────────────────────────────

impl VerifyStore for SqliteStore {
  type Error = crate::Error;

  // ── Users and platform identities ─────────────────────────────────────────

  async fn link_platform_user(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
    primary: bool,
  ) -> Result<User> {
    let now = encode_dt(Utc::now());
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let user = link_identity(&tx, platform_id, &platform_user_id, primary, &now)?;
        tx.commit()?;
        Ok(user)
      })
      .await?;
    raw.into_user()
  }

  async fn get_platform_link(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
  ) -> Result<Option<PlatformLink>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {LINK_COLUMNS} FROM platform_links
                  WHERE platform_id = ?1 AND platform_user_id = ?2"
              ),
              rusqlite::params![platform_id, platform_user_id],
              RawPlatformLink::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawPlatformLink::into_link).transpose()
  }

  async fn get_user(&self, user_id: Uuid) -> Result<Option<UserView>> {
    let id = encode_uuid(user_id);
    let raw = self.conn.call(move |conn| Ok(load_view(conn, &id)?)).await?;
    raw.map(RawUserView::into_view).transpose()
  }

  async fn get_platform_user(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
  ) -> Result<Option<UserView>> {
    let raw = self
      .conn
      .call(move |conn| {
        match user_id_for(conn, platform_id, &platform_user_id)? {
          Some(id) => Ok(load_view(conn, &id)?),
          None => Ok(None),
        }
      })
      .await?;
    raw.map(RawUserView::into_view).transpose()
  }

  // ── Credentials ───────────────────────────────────────────────────────────

  async fn save_api_key(&self, input: NewApiKey) -> Result<User> {
    let now = encode_dt(Utc::now());
    let mut account = AccountRow::encode(&input.account)?;
    let token = TokenRow::encode(&input.token)?;
    let NewApiKey { platform_id, platform_user_id, primary, .. } = input;

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let user = link_identity(&tx, platform_id, &platform_user_id, primary, &now)?;
        account.user_id = user.user_id.clone();
        upsert_account(&tx, &account)?;
        upsert_token(&tx, &token)?;
        tx.commit()?;
        Ok(user)
      })
      .await?;
    raw.into_user()
  }

  async fn find_stale_token(&self, query: StaleQuery) -> Result<Option<TokenInfo>> {
    let window = duration_days(query.freshness);
    let retention_cutoff = query
      .retention
      .and_then(|r| query.now.checked_sub_signed(r))
      .map(encode_dt);

    let raw = self
      .conn
      .call(move |conn| {
        // NULL last_attempt sorts first: never-attempted credentials lead.
        let sql = format!(
          "SELECT {TOKEN_COLUMNS} FROM token_infos
            WHERE {LIVE_TOKEN}
               OR (:cutoff IS NOT NULL AND last_success < :cutoff)
            ORDER BY last_attempt ASC, token_id ASC
            LIMIT 1"
        );
        Ok(
          conn
            .query_row(
              &sql,
              rusqlite::named_params! {
                ":window": window,
                ":cutoff": retention_cutoff,
              },
              RawTokenInfo::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawTokenInfo::into_token).transpose()
  }

  async fn user_tokens(&self, user_id: Uuid) -> Result<Vec<TokenInfo>> {
    let id = encode_uuid(user_id);
    let raws = self
      .conn
      .call(move |conn| {
        let rows = conn
          .prepare(&format!(
            "SELECT {TOKEN_COLUMNS} FROM token_infos
              WHERE account_id IN (SELECT account_id FROM accounts WHERE user_id = ?1)
              ORDER BY last_attempt ASC, token_id ASC"
          ))?
          .query_map([id], RawTokenInfo::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawTokenInfo::into_token).collect()
  }

  async fn mark_token_attempt(&self, token_id: String, at: DateTime<Utc>) -> Result<()> {
    let at = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE token_infos SET last_attempt = ?2 WHERE token_id = ?1",
          rusqlite::params![token_id, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn mark_token_success(&self, token_id: String, at: DateTime<Utc>) -> Result<()> {
    let at = encode_dt(at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE token_infos SET last_success = ?2 WHERE token_id = ?1",
          rusqlite::params![token_id, at],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn update_token_info(&self, token: TokenInfo) -> Result<()> {
    let row = TokenRow::encode(&token)?;
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE token_infos
              SET account_id = ?2, name = ?3, permissions = ?4
            WHERE token_id = ?1",
          rusqlite::params![row.token_id, row.account_id, row.name, row.permissions],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn count_live_tokens(
    &self,
    account_id: String,
    freshness: Duration,
    excluding: String,
  ) -> Result<usize> {
    let window = duration_days(freshness);
    let count: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          &format!(
            "SELECT COUNT(*) FROM token_infos
              WHERE account_id = :account AND token_id != :excluding
                AND {LIVE_TOKEN}"
          ),
          rusqlite::named_params! {
            ":account": account_id,
            ":excluding": excluding,
            ":window": window,
          },
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(count.max(0) as usize)
  }

  async fn purge_credential(
    &self,
    token_id: String,
    account_id: Option<String>,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM token_infos WHERE token_id = ?1", [&token_id])?;
        if let Some(account_id) = account_id {
          tx.execute(
            "DELETE FROM account_achievements WHERE account_id = ?1",
            [&account_id],
          )?;
          tx.execute("DELETE FROM accounts WHERE account_id = ?1", [&account_id])?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Accounts ──────────────────────────────────────────────────────────────

  async fn get_account(&self, account_id: String) -> Result<Option<Account>> {
    let raw = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("{ACCOUNT_SELECT} WHERE a.account_id = ?1"),
              [account_id],
              RawAccount::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawAccount::into_account).transpose()
  }

  async fn save_account(&self, account: Account) -> Result<()> {
    let row = AccountRow::encode(&account)?;
    self
      .conn
      .call(move |conn| {
        upsert_account(conn, &row)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn record_achievement(
    &self,
    account_id: String,
    achievement_id: i32,
    current: i64,
  ) -> Result<()> {
    let now = encode_dt(Utc::now());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO account_achievements
             (account_id, achievement_id, current, updated_at)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (account_id, achievement_id) DO UPDATE SET
             current    = excluded.current,
             updated_at = excluded.updated_at",
          rusqlite::params![account_id, achievement_id, current, now],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Bans and temporary grants ─────────────────────────────────────────────

  async fn add_ban(
    &self,
    user_id: Uuid,
    reason: String,
    until: DateTime<Utc>,
  ) -> Result<Ban> {
    let ban = Ban {
      ban_id: Uuid::new_v4(),
      user_id,
      reason,
      until,
      created_at: Utc::now(),
    };

    let id_str = encode_uuid(ban.ban_id);
    let user_str = encode_uuid(ban.user_id);
    let reason = ban.reason.clone();
    let until_str = encode_dt(ban.until);
    let at_str = encode_dt(ban.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          &format!("INSERT INTO bans ({BAN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
          rusqlite::params![id_str, user_str, reason, until_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(ban)
  }

  async fn grant_ephemeral(
    &self,
    platform_id: PlatformId,
    platform_user_id: String,
    world: WorldId,
    until: DateTime<Utc>,
  ) -> Result<(User, EphemeralAssociation)> {
    let created_at = Utc::now();
    let association_id = Uuid::new_v4();

    let now = encode_dt(created_at);
    let id_str = encode_uuid(association_id);
    let until_str = encode_dt(until);

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let user = link_identity(&tx, platform_id, &platform_user_id, true, &now)?;
        tx.execute(
          &format!(
            "INSERT INTO ephemeral_associations ({EPHEMERAL_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5)"
          ),
          rusqlite::params![id_str, user.user_id, world, until_str, now],
        )?;
        tx.commit()?;
        Ok(user)
      })
      .await?;

    let user = raw.into_user()?;
    let association = EphemeralAssociation {
      association_id,
      user_id: user.user_id,
      world,
      until,
      created_at,
    };
    Ok((user, association))
  }
}

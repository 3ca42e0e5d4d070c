//! SQL schema for the worldgate SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Timestamps are fixed-width RFC 3339 UTC strings (microsecond precision,
/// `Z` suffix), so lexical order is chronological order and `julianday()`
/// accepts them.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    user_id     TEXT PRIMARY KEY,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS platform_links (
    platform_id       INTEGER NOT NULL,
    platform_user_id  TEXT    NOT NULL,
    user_id           TEXT    NOT NULL REFERENCES users(user_id),
    is_primary        INTEGER NOT NULL DEFAULT 0,
    linked_at         TEXT    NOT NULL,
    UNIQUE (platform_id, platform_user_id)
);

CREATE TABLE IF NOT EXISTS accounts (
    account_id    TEXT PRIMARY KEY,
    user_id       TEXT    NOT NULL REFERENCES users(user_id),
    name          TEXT    NOT NULL,
    world         INTEGER NOT NULL,
    age_secs      INTEGER NOT NULL DEFAULT 0,
    access        TEXT    NOT NULL DEFAULT '[]',   -- JSON array
    commander     INTEGER NOT NULL DEFAULT 0,
    wvw_rank      INTEGER NOT NULL DEFAULT 0,
    wvw_team_id   INTEGER,
    wvw_guild_id  TEXT,
    guilds        TEXT    NOT NULL DEFAULT '[]',   -- JSON array
    created       TEXT,
    synced_at     TEXT    NOT NULL
);

-- account_id is not a foreign key: a credential may be stored before its
-- account has been fetched.
CREATE TABLE IF NOT EXISTS token_infos (
    token_id      TEXT PRIMARY KEY,
    account_id    TEXT,
    api_key       TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL DEFAULT '',
    permissions   TEXT NOT NULL DEFAULT '[]',      -- JSON array
    last_attempt  TEXT,
    last_success  TEXT
);

-- Bans are never updated; they expire by time.
CREATE TABLE IF NOT EXISTS bans (
    ban_id      TEXT PRIMARY KEY,
    user_id     TEXT NOT NULL REFERENCES users(user_id),
    reason      TEXT NOT NULL,
    until       TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ephemeral_associations (
    association_id  TEXT PRIMARY KEY,
    user_id         TEXT    NOT NULL REFERENCES users(user_id),
    world           INTEGER NOT NULL,
    until           TEXT    NOT NULL,
    created_at      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS account_achievements (
    account_id      TEXT    NOT NULL REFERENCES accounts(account_id) ON DELETE CASCADE,
    achievement_id  INTEGER NOT NULL,
    current         INTEGER NOT NULL,
    updated_at      TEXT    NOT NULL,
    UNIQUE (account_id, achievement_id)
);

CREATE INDEX IF NOT EXISTS platform_links_user_idx ON platform_links(user_id);
CREATE INDEX IF NOT EXISTS accounts_user_idx       ON accounts(user_id);
CREATE INDEX IF NOT EXISTS token_infos_account_idx ON token_infos(account_id);
CREATE INDEX IF NOT EXISTS token_infos_attempt_idx ON token_infos(last_attempt);
CREATE INDEX IF NOT EXISTS bans_user_idx           ON bans(user_id);
CREATE INDEX IF NOT EXISTS ephemeral_user_idx      ON ephemeral_associations(user_id);

PRAGMA user_version = 1;
";

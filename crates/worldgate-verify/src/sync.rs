//! The synchronization scheduler: keeps stored account snapshots fresh by
//! re-fetching them with their credentials.
//!
//! One control loop picks the stalest credential every tick and dispatches
//! its refresh onto its own task, bounded by a semaphore. A refresh runs
//! fetch → persist → notify strictly in order; refreshes of different
//! credentials are independent.

use std::{
  collections::HashSet,
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU32, AtomicU64, Ordering},
  },
  time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
  sync::Semaphore,
  time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use worldgate_core::{
  fetch::{AccountFetcher, FetchError, RemoteAccount},
  model::{Account, TokenInfo, UserView},
  resolve::StatusResolver,
  store::{StaleQuery, VerifyStore},
};

use crate::{
  config::VerifyConfig,
  error::{Error, Result, fetch_call, store_call},
  events::EventEmitter,
};

/// Consecutive failures after which the loop pauses for the cool-down.
pub const FAILURE_THRESHOLD: u32 = 10;
const STATS_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Tracked with `283` and kept as the larger of the two.
const KILLS_ALT_ACHIEVEMENT: i32 = 7912;
const KILLS_ACHIEVEMENT: i32 = 283;
/// Competitive progress counters fetched with the `progression` permission:
/// kills, supply spent, dolyak escorts and kills, and objective captures and
/// defences.
const ACHIEVEMENTS: [i32; 15] = [
  KILLS_ACHIEVEMENT,
  KILLS_ALT_ACHIEVEMENT,
  306,
  285,
  288,
  303,
  319,
  291,
  310,
  297,
  322,
  300,
  316,
  294,
  313,
];
/// Pseudo achievement ids for values that come from the account itself.
pub const WVW_RANK_COUNTER: i32 = -1;
pub const PLAY_TIME_COUNTER: i32 = -2;

const UNASSIGNED_GUILD: &str = "unassigned";

/// What one scheduling tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
  /// No credential is due.
  Idle,
  /// Every slot is taken; the tick is skipped.
  Saturated,
  /// The chosen credential is already being refreshed.
  InFlight(String),
  Dispatched(String),
}

/// Rolling counters, logged and reset every [`STATS_INTERVAL`].
#[derive(Debug, Default)]
struct SyncStats {
  successes: AtomicU64,
  failures:  AtomicU64,
  skips:     AtomicU64,
}

pub struct Synchronizer<S, F> {
  store:                Arc<S>,
  fetcher:              Arc<F>,
  emitter:              Arc<EventEmitter>,
  resolver:             StatusResolver,
  config:               VerifyConfig,
  slots:                Arc<Semaphore>,
  in_flight:            Mutex<HashSet<String>>,
  consecutive_failures: AtomicU32,
  stats:                SyncStats,
}

impl<S, F> Synchronizer<S, F>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  pub fn new(
    store: Arc<S>,
    fetcher: Arc<F>,
    emitter: Arc<EventEmitter>,
    config: VerifyConfig,
  ) -> Self {
    Self {
      store,
      fetcher,
      emitter,
      resolver: StatusResolver::new(config.freshness()),
      slots: Arc::new(Semaphore::new(config.max_concurrent_syncs.max(1))),
      config,
      in_flight: Mutex::new(HashSet::new()),
      consecutive_failures: AtomicU32::new(0),
      stats: SyncStats::default(),
    }
  }

  // ─── Loop ──────────────────────────────────────────────────────────────────

  /// Tick forever. Never returns.
  pub async fn run(self: Arc<Self>) {
    let mut timer = tokio::time::interval(self.config.sync_interval());
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut report = tokio::time::interval_at(Instant::now() + STATS_INTERVAL, STATS_INTERVAL);

    loop {
      tokio::select! {
        _ = timer.tick() => {
          self.cool_down_if_needed().await;
          if let Err(e) = self.sync_next().await {
            warn!(error = %e, "could not pick a credential to sync");
            self.record_failure();
          }
        }
        _ = report.tick() => self.report_stats(),
      }
    }
  }

  /// Sleep for the cool-down if the failure streak has reached the
  /// threshold. Returns whether it slept.
  pub async fn cool_down_if_needed(&self) -> bool {
    let failures = self.consecutive_failures();
    if failures < FAILURE_THRESHOLD {
      return false;
    }
    let cooldown = self.config.failure_cooldown();
    warn!(failures, cooldown_secs = cooldown.as_secs(), "too many sync failures; cooling down");
    tokio::time::sleep(cooldown).await;
    true
  }

  pub fn consecutive_failures(&self) -> u32 {
    self.consecutive_failures.load(Ordering::Relaxed)
  }

  pub fn in_flight(&self) -> usize {
    self.config.max_concurrent_syncs.max(1) - self.slots.available_permits()
  }

  fn record_success(&self) {
    self.consecutive_failures.store(0, Ordering::Relaxed);
    self.stats.successes.fetch_add(1, Ordering::Relaxed);
  }

  fn record_failure(&self) {
    self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    self.stats.failures.fetch_add(1, Ordering::Relaxed);
  }

  fn report_stats(&self) {
    info!(
      successes = self.stats.successes.swap(0, Ordering::Relaxed),
      failures = self.stats.failures.swap(0, Ordering::Relaxed),
      skips = self.stats.skips.swap(0, Ordering::Relaxed),
      in_flight = self.in_flight(),
      consecutive_failures = self.consecutive_failures(),
      "sync statistics"
    );
  }

  // ─── Dispatch ──────────────────────────────────────────────────────────────

  /// Pick the stalest credential and refresh it on a background task.
  pub async fn sync_next(self: &Arc<Self>) -> Result<TickOutcome> {
    let deadline = self.config.request_timeout();
    let query = StaleQuery {
      freshness: self.config.freshness(),
      retention: self.config.retention(),
      now:       Utc::now(),
    };
    let Some(token) =
      store_call(deadline, "find stale token", self.store.find_stale_token(query)).await?
    else {
      return Ok(TickOutcome::Idle);
    };

    let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
      self.stats.skips.fetch_add(1, Ordering::Relaxed);
      return Ok(TickOutcome::Saturated);
    };
    if !self.claim(&token.token_id) {
      self.stats.skips.fetch_add(1, Ordering::Relaxed);
      return Ok(TickOutcome::InFlight(token.token_id));
    }

    let token_id = token.token_id.clone();
    let this = Arc::clone(self);
    let work = tokio::spawn(async move {
      let _permit = permit;
      this.sync_claimed(token).await
    });

    // Supervisor: a panicking refresh is logged as a failure and never
    // reaches the loop.
    let this = Arc::clone(self);
    let supervised = token_id.clone();
    tokio::spawn(async move {
      let outcome = work.await;
      this.release(&supervised);
      match outcome {
        Ok(Ok(())) => this.record_success(),
        Ok(Err(_)) => this.record_failure(),
        Err(e) => {
          error!(token = %supervised, error = %e, "sync task faulted");
          this.record_failure();
        }
      }
    });

    Ok(TickOutcome::Dispatched(token_id))
  }

  /// Refresh every live credential of `user_id` in turn. Failures of single
  /// credentials are logged, not returned.
  pub async fn sync_user(&self, user_id: Uuid) -> Result<()> {
    let deadline = self.config.request_timeout();
    let tokens = store_call(deadline, "list user tokens", self.store.user_tokens(user_id)).await?;

    for token in tokens
      .into_iter()
      .filter(|t| t.is_live(self.config.freshness()))
    {
      if !self.claim(&token.token_id) {
        debug!(token = %token.token_id, "already syncing; skipped");
        continue;
      }
      let token_id = token.token_id.clone();
      let result = self.sync_claimed(token).await;
      self.release(&token_id);
      match result {
        Ok(()) => self.record_success(),
        Err(_) => self.record_failure(),
      }
    }
    Ok(())
  }

  fn claim(&self, token_id: &str) -> bool {
    self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(token_id.to_owned())
  }

  fn release(&self, token_id: &str) {
    self
      .in_flight
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(token_id);
  }

  /// Refresh one credential and run the failure policy if it fails.
  async fn sync_claimed(&self, token: TokenInfo) -> Result<()> {
    let result = self.sync_token(token.clone()).await;
    if let Err(e) = &result {
      self.handle_failure(&token, e).await;
    }
    result
  }

  // ─── One credential ────────────────────────────────────────────────────────

  async fn sync_token(&self, mut token: TokenInfo) -> Result<()> {
    let deadline = self.config.request_timeout();
    let now = Utc::now();
    let key = token.api_key.clone();

    store_call(
      deadline,
      "mark attempt",
      self.store.mark_token_attempt(token.token_id.clone(), now),
    )
    .await?;

    let remote = fetch_call(deadline, "fetch account", self.fetcher.account(&key)).await?;

    if token.account_id.is_none() || token.permissions.is_empty() {
      let info = fetch_call(deadline, "fetch token info", self.fetcher.token_info(&key)).await?;
      token.account_id = Some(remote.id.clone());
      token.name = info.name;
      token.permissions = info.permissions;
      store_call(deadline, "update token info", self.store.update_token_info(token.clone()))
        .await?;
    }

    let stored = store_call(deadline, "load account", self.store.get_account(remote.id.clone()))
      .await?
      .ok_or_else(|| Error::NotFound(format!("account {}", remote.id)))?;
    let old = self.load_view(stored.user_id).await?;

    let mut snapshot = account_snapshot(&remote, stored.user_id, now);
    snapshot.wvw_guild_id = stored.wvw_guild_id;
    if token.has_permission("wvw") {
      let wvw = fetch_call(deadline, "fetch wvw", self.fetcher.account_wvw(&key)).await?;
      snapshot.wvw_team_id = wvw.team.or(snapshot.wvw_team_id);
      snapshot.wvw_guild_id = Some(
        wvw
          .guild
          .filter(|g| !g.is_empty())
          .unwrap_or_else(|| UNASSIGNED_GUILD.to_owned()),
      );
    }

    store_call(deadline, "save account", self.store.save_account(snapshot)).await?;
    store_call(
      deadline,
      "mark success",
      self.store.mark_token_success(token.token_id.clone(), now),
    )
    .await?;

    if token.has_permission("progression")
      && let Err(e) = self.record_progress(&key, &remote).await
    {
      warn!(account = %remote.id, error = %e, "could not record achievements");
    }

    if let Some(new) = self.load_view(stored.user_id).await? {
      let emitted = self.emitter.process(old.as_ref(), &new);
      debug!(token = %token.token_id, account = %remote.id, emitted, "credential synced");
    }
    Ok(())
  }

  async fn load_view(&self, user_id: Uuid) -> Result<Option<UserView>> {
    let deadline = self.config.request_timeout();
    let mut view = store_call(deadline, "load user", self.store.get_user(user_id)).await?;
    if let Some(view) = &mut view {
      self.resolver.annotate(view, Utc::now());
    }
    Ok(view)
  }

  async fn record_progress(&self, key: &str, remote: &RemoteAccount) -> Result<()> {
    let deadline = self.config.request_timeout();
    let progress = fetch_call(
      deadline,
      "fetch achievements",
      self.fetcher.account_achievements(key, &ACHIEVEMENTS),
    )
    .await?;

    let mut counters: Vec<(i32, i64)> = Vec::with_capacity(progress.len() + 2);
    let mut kills = None;
    for a in progress {
      match a.id {
        KILLS_ACHIEVEMENT | KILLS_ALT_ACHIEVEMENT => {
          kills = Some(kills.map_or(a.current, |k: i64| k.max(a.current)));
        }
        id => counters.push((id, a.current)),
      }
    }
    counters.extend(kills.map(|k| (KILLS_ACHIEVEMENT, k)));
    counters.push((WVW_RANK_COUNTER, i64::from(remote.effective_wvw_rank())));
    counters.push((PLAY_TIME_COUNTER, remote.age));

    for (id, current) in counters {
      store_call(
        deadline,
        "record achievement",
        self.store.record_achievement(remote.id.clone(), id, current),
      )
      .await?;
    }
    Ok(())
  }

  // ─── Failure policy ────────────────────────────────────────────────────────

  async fn handle_failure(&self, token: &TokenInfo, err: &Error) {
    let invalid_key = matches!(err, Error::Fetch(FetchError::InvalidKey));
    if !invalid_key || self.config.verbose {
      warn!(token = %token.token_id, error = %err, "credential sync failed");
    }

    if let Err(e) = self.apply_retention(token, Utc::now()).await {
      error!(token = %token.token_id, error = %e, "retention check failed");
    }
  }

  /// Purge a credential that has not succeeded within the retention window.
  ///
  /// The credential and its account snapshot are purged together, and only
  /// when no other live credential backs the account and the owner is not
  /// banned. Returns whether anything was purged.
  pub async fn apply_retention(&self, token: &TokenInfo, now: DateTime<Utc>) -> Result<bool> {
    let Some(retention) = self.config.retention() else {
      return Ok(false);
    };
    let Some(cutoff) = now.checked_sub_signed(retention) else {
      return Ok(false);
    };
    if token.last_success.is_some_and(|s| s >= cutoff) {
      return Ok(false);
    }

    let deadline = self.config.request_timeout();
    let account = match &token.account_id {
      Some(id) => store_call(deadline, "load account", self.store.get_account(id.clone())).await?,
      None => None,
    };

    let Some(account) = account else {
      store_call(
        deadline,
        "purge credential",
        self.store.purge_credential(token.token_id.clone(), None),
      )
      .await?;
      info!(token = %token.token_id, "purged credential without account");
      return Ok(true);
    };

    let owner = store_call(deadline, "load user", self.store.get_user(account.user_id)).await?;
    if owner.is_some_and(|v| v.active_ban(now).is_some()) {
      debug!(account = %account.account_id, "owner is banned; credential retained");
      return Ok(false);
    }

    let others = store_call(
      deadline,
      "count live tokens",
      self.store.count_live_tokens(
        account.account_id.clone(),
        self.config.freshness(),
        token.token_id.clone(),
      ),
    )
    .await?;

    if others > 0 {
      debug!(
        token = %token.token_id,
        account = %account.account_id,
        others,
        "account has other live credentials; credential retained"
      );
      return Ok(false);
    }

    store_call(
      deadline,
      "purge credential",
      self
        .store
        .purge_credential(token.token_id.clone(), Some(account.account_id.clone())),
    )
    .await?;
    info!(
      token = %token.token_id,
      account = %account.account_id,
      "purged expired credential and account"
    );
    Ok(true)
  }
}

/// Translate a fetched account into the persisted snapshot.
pub(crate) fn account_snapshot(
  remote: &RemoteAccount,
  user_id: Uuid,
  now: DateTime<Utc>,
) -> Account {
  Account {
    account_id:   remote.id.clone(),
    user_id,
    name:         remote.name.clone(),
    world:        remote.world,
    age_secs:     remote.age,
    access:       remote.access.clone(),
    commander:    remote.commander,
    wvw_rank:     remote.effective_wvw_rank(),
    wvw_team_id:  remote.wvw.as_ref().and_then(|w| w.team_id),
    wvw_guild_id: None,
    guilds:       remote.guilds.clone(),
    created:      remote.created,
    synced_at:    now,
    last_credential_success: None,
    expired:      false,
  }
}

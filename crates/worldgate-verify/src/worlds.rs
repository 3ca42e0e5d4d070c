//! World-link cache: the current matchup pairings, refreshed in the
//! background.
//!
//! Single writer (the refresh loop), many readers. The map is replaced
//! wholesale behind an `Arc`, so readers never see a half-built map.

use std::{
  sync::{Arc, PoisonError, RwLock},
  time::Duration,
};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use worldgate_core::{
  fetch::{AccountFetcher, Matchup},
  world::{WORLDS, WorldId, WorldLinkMap},
};

use crate::error::{Result, fetch_call};

/// Lower bound on the wait between refreshes.
const MIN_REFRESH_DELAY: Duration = Duration::from_secs(60);
/// Wait used when no matchup end time is known.
const UNKNOWN_END_DELAY: Duration = Duration::from_secs(5 * 60);

/// What a refresh did with the fetched schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
  Committed { worlds: usize },
  /// No matchups came back; the previous map is kept.
  Empty,
  /// Fewer distinct worlds than the catalog holds; the previous map is kept.
  Incomplete { found: usize, expected: usize },
}

pub struct WorldLinkCache {
  current:         RwLock<Option<Arc<WorldLinkMap>>>,
  expected_worlds: usize,
}

impl Default for WorldLinkCache {
  fn default() -> Self { Self::new() }
}

impl WorldLinkCache {
  /// A cache that requires the full static catalog to be covered.
  pub fn new() -> Self { Self::with_expected_worlds(WORLDS.len()) }

  pub fn with_expected_worlds(expected_worlds: usize) -> Self {
    Self { current: RwLock::new(None), expected_worlds }
  }

  // ── Reads ───────────────────────────────────────────────────────────────

  /// The committed map, or `None` before the first successful refresh.
  pub fn snapshot(&self) -> Option<Arc<WorldLinkMap>> {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Never reverts to `false` once a refresh has committed.
  pub fn is_synced(&self) -> bool { self.snapshot().is_some() }

  pub fn all(&self) -> worldgate_core::Result<Arc<WorldLinkMap>> {
    self
      .snapshot()
      .ok_or(worldgate_core::Error::WorldLinksNotSynced)
  }

  /// Worlds linked to `world`. An empty list is a real answer; an
  /// unsynchronised cache is an error.
  pub fn links(&self, world: WorldId) -> worldgate_core::Result<Vec<WorldId>> {
    let map = self.all()?;
    if !map.links.contains_key(&world) {
      return Err(worldgate_core::Error::UnknownWorld(world));
    }
    Ok(map.links_for(world))
  }

  // ── Writes ──────────────────────────────────────────────────────────────

  /// Build a map from `matchups` and commit it if it passes the sanity
  /// checks.
  pub fn apply(&self, matchups: &[Matchup]) -> RefreshOutcome {
    if matchups.is_empty() {
      return RefreshOutcome::Empty;
    }

    let build = WorldLinkMap::build(matchups, WORLDS);
    if build.distinct_worlds < self.expected_worlds {
      return RefreshOutcome::Incomplete {
        found:    build.distinct_worlds,
        expected: self.expected_worlds,
      };
    }

    let worlds = build.distinct_worlds;
    *self.current.write().unwrap_or_else(PoisonError::into_inner) =
      Some(Arc::new(build.map));
    RefreshOutcome::Committed { worlds }
  }

  /// Fetch the matchup schedule and [`apply`](Self::apply) it.
  pub async fn refresh<F: AccountFetcher>(
    &self,
    fetcher: &F,
    deadline: Duration,
  ) -> Result<RefreshOutcome> {
    let matchups = fetch_call(deadline, "fetch matchups", fetcher.wvw_matches()).await?;
    Ok(self.apply(&matchups))
  }

  /// How long to wait before the next refresh.
  pub fn next_refresh_delay(&self, now: DateTime<Utc>) -> Duration {
    match self.snapshot().and_then(|m| m.expires_at) {
      Some(end) => (end - now)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .max(MIN_REFRESH_DELAY),
      None => UNKNOWN_END_DELAY,
    }
  }

  /// Refresh now, then again at every matchup boundary. Never returns.
  pub async fn run<F: AccountFetcher>(self: Arc<Self>, fetcher: Arc<F>, deadline: Duration) {
    loop {
      match self.refresh(fetcher.as_ref(), deadline).await {
        Ok(RefreshOutcome::Committed { worlds }) => {
          info!(worlds, "world links refreshed");
        }
        Ok(RefreshOutcome::Empty) => {
          warn!("matchup schedule was empty; keeping previous world links");
        }
        Ok(RefreshOutcome::Incomplete { found, expected }) => {
          warn!(found, expected, "matchup schedule incomplete; keeping previous world links");
        }
        Err(e) => error!(error = %e, "could not refresh world links"),
      }

      let delay = self.next_refresh_delay(Utc::now());
      tokio::time::sleep(delay).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use worldgate_core::fetch::MatchupWorlds;

  use super::*;

  fn matchup(end: DateTime<Utc>, red: &[i32], blue: &[i32], green: &[i32]) -> Matchup {
    Matchup {
      id:       "1-1".into(),
      end_time: end,
      worlds:   MatchupWorlds {
        red:   red.to_vec(),
        blue:  blue.to_vec(),
        green: green.to_vec(),
      },
    }
  }

  fn end() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 6, 7, 18, 0, 0).unwrap() }

  #[test]
  fn unsynced_cache_is_distinguishable_from_empty() {
    let cache = WorldLinkCache::with_expected_worlds(3);
    assert!(!cache.is_synced());
    assert!(matches!(
      cache.links(1),
      Err(worldgate_core::Error::WorldLinksNotSynced)
    ));

    cache.apply(&[matchup(end(), &[1], &[2], &[3])]);
    assert!(cache.is_synced());
    assert_eq!(cache.links(1).unwrap(), Vec::<WorldId>::new());
    assert!(matches!(
      cache.links(4),
      Err(worldgate_core::Error::UnknownWorld(4))
    ));
  }

  #[test]
  fn empty_schedule_keeps_previous_map() {
    let cache = WorldLinkCache::with_expected_worlds(3);
    let outcome = cache.apply(&[matchup(end(), &[1, 2], &[3], &[4])]);
    assert_eq!(outcome, RefreshOutcome::Committed { worlds: 4 });
    let before = cache.snapshot();

    assert_eq!(cache.apply(&[]), RefreshOutcome::Empty);
    assert!(cache.is_synced());
    assert_eq!(cache.snapshot(), before);
  }

  #[test]
  fn incomplete_schedule_is_not_committed() {
    let cache = WorldLinkCache::with_expected_worlds(6);
    let outcome = cache.apply(&[matchup(end(), &[1, 2], &[3], &[4])]);
    assert_eq!(outcome, RefreshOutcome::Incomplete { found: 4, expected: 6 });
    assert!(!cache.is_synced());

    cache.apply(&[matchup(end(), &[1, 2], &[3, 5], &[4, 6])]);
    assert_eq!(cache.links(3).unwrap(), vec![5]);

    cache.apply(&[matchup(end(), &[1], &[2], &[3])]);
    assert_eq!(cache.links(3).unwrap(), vec![5], "partial fetch must not replace");
  }

  #[test]
  fn catalog_sized_cache_rejects_partial_schedule() {
    let cache = WorldLinkCache::new();
    let outcome = cache.apply(&[matchup(end(), &[1001], &[1002], &[1003])]);
    assert!(matches!(outcome, RefreshOutcome::Incomplete { found: 3, .. }));
  }

  #[test]
  fn refresh_delay_is_clamped() {
    let cache = WorldLinkCache::with_expected_worlds(1);
    assert_eq!(cache.next_refresh_delay(end()), UNKNOWN_END_DELAY);

    cache.apply(&[matchup(end(), &[1], &[], &[])]);
    let an_hour_before = end() - chrono::Duration::hours(1);
    assert_eq!(cache.next_refresh_delay(an_hour_before), Duration::from_secs(3_600));

    let after = end() + chrono::Duration::hours(1);
    assert_eq!(cache.next_refresh_delay(after), MIN_REFRESH_DELAY);
  }
}

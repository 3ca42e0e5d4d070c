//! Tunables for the verification runtime.

use std::time::Duration;

use serde::Deserialize;
use worldgate_core::restrict::RestrictionPolicy;

/// Deserialised from the `[verify]` table of the server configuration.
/// Every field has a default, so an empty table is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VerifyConfig {
  /// Maximum age of account data before it counts as expired.
  pub freshness_window_secs:     u64,
  /// How long a dead credential is kept before it is purged. Unset keeps it
  /// forever.
  pub retention_window_secs:     Option<u64>,
  /// Length of a temporary grant when the request gives no end time.
  pub temporary_access_secs:     u64,
  pub max_concurrent_syncs:      usize,
  pub sync_interval_ms:          u64,
  pub failure_cooldown_secs:     u64,
  /// Deadline applied to every store call and remote fetch.
  pub request_timeout_secs:      u64,
  pub listener_capacity:         usize,
  pub listener_timeout_secs:     u64,
  pub skip_restrictions:         bool,
  /// Also log sync failures caused by invalid keys.
  pub verbose:                   bool,
  pub free_to_play_min_wvw_rank: i32,
  pub free_to_play_min_level:    i32,
}

impl Default for VerifyConfig {
  fn default() -> Self {
    Self {
      freshness_window_secs:     86_400,
      retention_window_secs:     None,
      temporary_access_secs:     3_600,
      max_concurrent_syncs:      4,
      sync_interval_ms:          1_000,
      failure_cooldown_secs:     10,
      request_timeout_secs:      10,
      listener_capacity:         10,
      listener_timeout_secs:     120,
      skip_restrictions:         false,
      verbose:                   false,
      free_to_play_min_wvw_rank: 0,
      free_to_play_min_level:    80,
    }
  }
}

impl VerifyConfig {
  pub fn freshness(&self) -> chrono::Duration { secs(self.freshness_window_secs) }

  pub fn retention(&self) -> Option<chrono::Duration> {
    self.retention_window_secs.map(secs)
  }

  pub fn temporary_access(&self) -> chrono::Duration { secs(self.temporary_access_secs) }

  /// Never zero: a zero period is treated as one millisecond.
  pub fn sync_interval(&self) -> Duration {
    Duration::from_millis(self.sync_interval_ms.max(1))
  }

  pub fn failure_cooldown(&self) -> Duration {
    Duration::from_secs(self.failure_cooldown_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn listener_timeout(&self) -> Duration {
    Duration::from_secs(self.listener_timeout_secs)
  }

  pub fn restriction_policy(&self) -> RestrictionPolicy {
    RestrictionPolicy {
      free_to_play_min_wvw_rank: self.free_to_play_min_wvw_rank,
      free_to_play_min_level: self.free_to_play_min_level,
      ..RestrictionPolicy::default()
    }
  }
}

fn secs(s: u64) -> chrono::Duration {
  i64::try_from(s)
    .ok()
    .and_then(chrono::Duration::try_seconds)
    .unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_sync_interval_is_clamped() {
    let config = VerifyConfig { sync_interval_ms: 0, ..VerifyConfig::default() };
    assert_eq!(config.sync_interval(), Duration::from_millis(1));

    let config = VerifyConfig { sync_interval_ms: 250, ..VerifyConfig::default() };
    assert_eq!(config.sync_interval(), Duration::from_millis(250));
  }
}

//! In-memory [`AccountFetcher`] double for the service tests.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use tokio::sync::Semaphore;
use worldgate_core::fetch::{
  AccountFetcher, FetchError, Matchup, RemoteAccount, RemoteAccountWvwSummary,
  RemoteAchievement, RemoteCharacter, RemoteTokenInfo, RemoteWvw,
};

/// Everything the fake API knows about one key.
#[derive(Debug, Clone, Default)]
pub struct FakeKey {
  pub token:        RemoteTokenInfo,
  pub account:      RemoteAccount,
  pub wvw:          RemoteWvw,
  pub achievements: Vec<RemoteAchievement>,
  pub characters:   Vec<RemoteCharacter>,
}

#[derive(Default)]
pub struct FakeFetcher {
  keys:              Mutex<HashMap<String, FakeKey>>,
  matchups:          Mutex<Vec<Matchup>>,
  gate:              Mutex<Option<Arc<Semaphore>>>,
  pub account_calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn insert(&self, api_key: &str, key: FakeKey) {
    self.keys.lock().unwrap().insert(api_key.to_owned(), key);
  }

  pub fn set_matchups(&self, matchups: Vec<Matchup>) {
    *self.matchups.lock().unwrap() = matchups;
  }

  /// Make account fetches wait until permits are added to the returned
  /// semaphore.
  pub fn close_gate(&self) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
    gate
  }

  fn key(&self, api_key: &str) -> Result<FakeKey, FetchError> {
    self
      .keys
      .lock()
      .unwrap()
      .get(api_key)
      .cloned()
      .ok_or(FetchError::InvalidKey)
  }
}

impl AccountFetcher for FakeFetcher {
  async fn token_info(&self, api_key: &str) -> Result<RemoteTokenInfo, FetchError> {
    Ok(self.key(api_key)?.token)
  }

  async fn account(&self, api_key: &str) -> Result<RemoteAccount, FetchError> {
    self.account_calls.fetch_add(1, Ordering::SeqCst);
    let gate = self.gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      let _permit = gate.acquire().await.unwrap();
    }
    Ok(self.key(api_key)?.account)
  }

  async fn account_wvw(&self, api_key: &str) -> Result<RemoteWvw, FetchError> {
    Ok(self.key(api_key)?.wvw)
  }

  async fn account_achievements(
    &self,
    api_key: &str,
    ids: &[i32],
  ) -> Result<Vec<RemoteAchievement>, FetchError> {
    let key = self.key(api_key)?;
    Ok(
      key
        .achievements
        .into_iter()
        .filter(|a| ids.contains(&a.id))
        .collect(),
    )
  }

  async fn characters(&self, api_key: &str) -> Result<Vec<String>, FetchError> {
    Ok(
      self
        .key(api_key)?
        .characters
        .into_iter()
        .map(|c| c.name)
        .collect(),
    )
  }

  async fn character_core(
    &self,
    api_key: &str,
    name: &str,
  ) -> Result<RemoteCharacter, FetchError> {
    self
      .key(api_key)?
      .characters
      .into_iter()
      .find(|c| c.name == name)
      .ok_or_else(|| FetchError::Status(404, "no such character".into()))
  }

  async fn wvw_matches(&self) -> Result<Vec<Matchup>, FetchError> {
    Ok(self.matchups.lock().unwrap().clone())
  }
}

/// A paid account on `world`.
pub fn remote_account(id: &str, world: i32) -> RemoteAccount {
  RemoteAccount {
    id: id.to_owned(),
    name: format!("{id}.1234"),
    world,
    age: 7_200,
    access: vec!["GuildWars2".into(), "HeartOfThorns".into()],
    wvw: Some(RemoteAccountWvwSummary { team_id: Some(11_005), rank: Some(150) }),
    ..RemoteAccount::default()
  }
}

/// A key for `account` with a plain name and full permissions.
pub fn remote_key(api_key: &str, account: RemoteAccount) -> FakeKey {
  FakeKey {
    token: RemoteTokenInfo {
      id:          format!("tok-{api_key}"),
      name:        "key".into(),
      permissions: ["account", "characters", "progression", "wvw"]
        .map(String::from)
        .to_vec(),
    },
    account,
    ..FakeKey::default()
  }
}

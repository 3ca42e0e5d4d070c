//! Runtime components of the verification service: the world-link cache,
//! the event emitter, the synchronization scheduler and the mutation
//! services built on top of them.
//!
//! Everything here is generic over a [`VerifyStore`] and an
//! [`AccountFetcher`]; [`Services`] wires one of each into a ready set.

pub mod ban;
pub mod config;
pub mod ephemeral;
pub mod error;
pub mod events;
pub mod link;
pub mod sync;
pub mod worlds;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use worldgate_core::{
  Status,
  fetch::AccountFetcher,
  model::{Ban, PlatformId, UserView},
  resolve::StatusResolver,
  store::VerifyStore,
  world::WorldId,
};

pub use crate::{
  ban::BanService,
  config::VerifyConfig,
  ephemeral::{AccessType, EphemeralService, GrantRequest},
  error::{Error, Result},
  events::{EventEmitter, Subscription},
  link::{LinkRequest, Linker},
  sync::Synchronizer,
  worlds::WorldLinkCache,
};
use crate::error::store_call;

/// Every component, constructed once at start-up and shared by handle.
pub struct Services<S, F> {
  pub config:    VerifyConfig,
  pub resolver:  StatusResolver,
  pub store:     Arc<S>,
  pub fetcher:   Arc<F>,
  pub worlds:    Arc<WorldLinkCache>,
  pub emitter:   Arc<EventEmitter>,
  pub sync:      Arc<Synchronizer<S, F>>,
  pub linker:    Linker<S, F>,
  pub bans:      BanService<S>,
  pub ephemeral: EphemeralService<S>,
}

impl<S, F> Services<S, F>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  pub fn new(store: Arc<S>, fetcher: Arc<F>, config: VerifyConfig) -> Self {
    Self::with_worlds(store, fetcher, Arc::new(WorldLinkCache::new()), config)
  }

  pub fn with_worlds(
    store: Arc<S>,
    fetcher: Arc<F>,
    worlds: Arc<WorldLinkCache>,
    config: VerifyConfig,
  ) -> Self {
    let resolver = StatusResolver::new(config.freshness());
    let emitter = Arc::new(
      EventEmitter::new(resolver, Arc::clone(&worlds), config.listener_capacity)
        .with_idle_timeout(config.listener_timeout()),
    );
    Self {
      sync: Arc::new(Synchronizer::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        Arc::clone(&emitter),
        config.clone(),
      )),
      linker: Linker::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        Arc::clone(&emitter),
        config.clone(),
      ),
      bans: BanService::new(Arc::clone(&store), Arc::clone(&emitter), config.clone()),
      ephemeral: EphemeralService::new(
        Arc::clone(&store),
        Arc::clone(&emitter),
        Arc::clone(&worlds),
        config.clone(),
      ),
      config,
      resolver,
      store,
      fetcher,
      worlds,
      emitter,
    }
  }

  /// Start the world-link refresh loop and the scheduler.
  pub fn spawn_background(&self) -> (JoinHandle<()>, JoinHandle<()>) {
    let worlds = tokio::spawn(
      Arc::clone(&self.worlds).run(Arc::clone(&self.fetcher), self.config.request_timeout()),
    );
    let sync = tokio::spawn(Arc::clone(&self.sync).run());
    (worlds, sync)
  }

  /// The user behind a platform identity, with `expired` flags filled in.
  pub async fn platform_user(
    &self,
    platform_id: PlatformId,
    platform_user_id: &str,
  ) -> Result<Option<UserView>> {
    let mut view = store_call(
      self.config.request_timeout(),
      "load platform user",
      self
        .store
        .get_platform_user(platform_id, platform_user_id.to_owned()),
    )
    .await?;
    if let Some(view) = &mut view {
      self.resolver.annotate(view, Utc::now());
    }
    Ok(view)
  }

  /// Resolve a platform identity's status seen from `perspective`, with the
  /// active ban if there is one. Unknown identities are not linked.
  pub async fn verification_status(
    &self,
    perspective: WorldId,
    platform_id: PlatformId,
    platform_user_id: &str,
  ) -> Result<(Status, Option<Ban>)> {
    let Some(view) = self.platform_user(platform_id, platform_user_id).await? else {
      return Ok((Status::DeniedAccountNotLinked, None));
    };
    let now = Utc::now();
    let links = self.worlds.snapshot();
    let status = self
      .resolver
      .resolve(perspective, &view, links.as_deref(), now);
    Ok((status, view.active_ban(now).cloned()))
  }

  /// Re-sync every live credential of a platform identity and return the
  /// refreshed view.
  pub async fn refresh_platform_user(
    &self,
    platform_id: PlatformId,
    platform_user_id: &str,
  ) -> Result<UserView> {
    let view = self
      .platform_user(platform_id, platform_user_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("platform user {platform_id}/{platform_user_id}")))?;
    self.sync.sync_user(view.user_id()).await?;
    self
      .platform_user(platform_id, platform_user_id)
      .await?
      .ok_or_else(|| Error::NotFound(format!("platform user {platform_id}/{platform_user_id}")))
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration as ChronoDuration;
  use worldgate_core::fetch::{Matchup, MatchupWorlds};
  use worldgate_store_sqlite::SqliteStore;

  use super::*;
  use crate::testing::{FakeFetcher, remote_account, remote_key};

  async fn services() -> Services<SqliteStore, FakeFetcher> {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let config = VerifyConfig { skip_restrictions: true, ..VerifyConfig::default() };
    Services::with_worlds(
      store,
      Arc::new(FakeFetcher::default()),
      Arc::new(WorldLinkCache::with_expected_worlds(4)),
      config,
    )
  }

  fn link_request(puid: &str, api_key: &str) -> LinkRequest {
    LinkRequest {
      perspective:       None,
      platform_id:       1,
      platform_user_id:  puid.into(),
      primary:           true,
      api_key:           api_key.into(),
      skip_requirements: false,
    }
  }

  #[tokio::test]
  async fn status_follows_links_and_bans() {
    let s = services().await;
    s.fetcher
      .insert("KEY-A", remote_key("KEY-A", remote_account("acc-a", 2102)));
    s.linker.link_api_key(link_request("alice", "KEY-A")).await.unwrap();

    let (status, _) = s.verification_status(2102, 1, "alice").await.unwrap();
    assert_eq!(status, Status::GrantedHomeWorld);
    let (status, _) = s.verification_status(2101, 1, "alice").await.unwrap();
    assert_eq!(status, Status::DeniedUnknown);

    s.fetcher.set_matchups(vec![Matchup {
      id:       "2-1".into(),
      end_time: Utc::now() + ChronoDuration::days(2),
      worlds:   MatchupWorlds {
        red:   vec![2101, 2102],
        blue:  vec![2201],
        green: vec![2301],
      },
    }]);
    s.worlds
      .refresh(s.fetcher.as_ref(), s.config.request_timeout())
      .await
      .unwrap();
    let (status, _) = s.verification_status(2101, 1, "alice").await.unwrap();
    assert_eq!(status, Status::GrantedLinkedWorld);
    let (status, _) = s.verification_status(2201, 1, "alice").await.unwrap();
    assert_eq!(status, Status::DeniedInvalidWorld);

    let until = Utc::now() + ChronoDuration::hours(1);
    s.bans
      .ban_platform_user(1, "alice", "afk farming".into(), until)
      .await
      .unwrap();
    let (status, ban) = s.verification_status(2102, 1, "alice").await.unwrap();
    assert_eq!(status, Status::DeniedBanned);
    assert_eq!(ban.unwrap().reason, "afk farming");
  }

  #[tokio::test]
  async fn unknown_identity_is_not_linked() {
    let s = services().await;
    let (status, ban) = s.verification_status(2101, 1, "nobody").await.unwrap();
    assert_eq!(status, Status::DeniedAccountNotLinked);
    assert!(ban.is_none());
    assert!(matches!(
      s.refresh_platform_user(1, "nobody").await,
      Err(Error::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn refresh_picks_up_world_transfer() {
    let s = services().await;
    s.fetcher
      .insert("KEY-A", remote_key("KEY-A", remote_account("acc-a", 2101)));
    s.linker.link_api_key(link_request("alice", "KEY-A")).await.unwrap();

    s.fetcher
      .insert("KEY-A", remote_key("KEY-A", remote_account("acc-a", 2301)));
    let view = s.refresh_platform_user(1, "alice").await.unwrap();
    assert_eq!(view.accounts[0].world, 2301);
  }
}

//! Temporary world access granted without a game account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use worldgate_core::{
  model::PlatformId,
  resolve::StatusResolver,
  store::VerifyStore,
  world::{WorldId, find_world},
};

use crate::{
  config::VerifyConfig,
  error::{Error, Result, store_call},
  events::EventEmitter,
  worlds::WorldLinkCache,
};

/// How to pick the granted world when none is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
  /// The perspective world itself.
  HomeWorld,
  /// A world currently linked to the perspective.
  LinkedWorld,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantRequest {
  #[serde(default)]
  pub world:       Option<WorldId>,
  #[serde(default)]
  pub access_type: Option<AccessType>,
  /// Defaults to now plus the configured temporary access length.
  #[serde(default)]
  pub until:       Option<DateTime<Utc>>,
}

pub struct EphemeralService<S> {
  store:    Arc<S>,
  emitter:  Arc<EventEmitter>,
  worlds:   Arc<WorldLinkCache>,
  resolver: StatusResolver,
  config:   VerifyConfig,
}

impl<S: VerifyStore> EphemeralService<S> {
  pub fn new(
    store: Arc<S>,
    emitter: Arc<EventEmitter>,
    worlds: Arc<WorldLinkCache>,
    config: VerifyConfig,
  ) -> Self {
    Self {
      store,
      emitter,
      worlds,
      resolver: StatusResolver::new(config.freshness()),
      config,
    }
  }

  /// Grant the platform identity temporary access seen from `perspective`.
  /// Returns the grant's expiry.
  pub async fn grant(
    &self,
    perspective: WorldId,
    platform_id: PlatformId,
    platform_user_id: &str,
    request: GrantRequest,
  ) -> Result<DateTime<Utc>> {
    let deadline = self.config.request_timeout();
    let now = Utc::now();
    let world = self.target_world(perspective, &request)?;
    let until = request.until.unwrap_or_else(|| {
      now
        .checked_add_signed(self.config.temporary_access())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
    });
    if until <= now {
      return Err(Error::Rejected("temporary access must end in the future".into()));
    }

    let mut old = store_call(
      deadline,
      "load platform user",
      self
        .store
        .get_platform_user(platform_id, platform_user_id.to_owned()),
    )
    .await?;

    let (user, grant) = store_call(
      deadline,
      "grant temporary access",
      self
        .store
        .grant_ephemeral(platform_id, platform_user_id.to_owned(), world, until),
    )
    .await?;
    info!(user = %user.user_id, world, until = %grant.until, "temporary access granted");

    if let Some(mut new) =
      store_call(deadline, "load user", self.store.get_user(user.user_id)).await?
    {
      if let Some(old) = &mut old {
        self.resolver.annotate(old, now);
      }
      self.resolver.annotate(&mut new, now);
      self.emitter.process(old.as_ref(), &new);
    }
    Ok(grant.until)
  }

  fn target_world(&self, perspective: WorldId, request: &GrantRequest) -> Result<WorldId> {
    if let Some(world) = request.world {
      if find_world(world).is_none() {
        return Err(Error::Rejected(format!("unknown world {world}")));
      }
      return Ok(world);
    }

    match request.access_type {
      Some(AccessType::HomeWorld) => Ok(perspective),
      Some(AccessType::LinkedWorld) => self
        .worlds
        .links(perspective)?
        .first()
        .copied()
        .ok_or_else(|| Error::Rejected(format!("world {perspective} has no linked world"))),
      None => Err(Error::Rejected("either world or access_type is required".into())),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use chrono::Duration as ChronoDuration;
  use worldgate_core::{
    Status,
    fetch::{Matchup, MatchupWorlds},
  };
  use worldgate_store_sqlite::SqliteStore;

  use super::*;

  struct Fixture {
    store:   Arc<SqliteStore>,
    emitter: Arc<EventEmitter>,
    worlds:  Arc<WorldLinkCache>,
    grants:  EphemeralService<SqliteStore>,
  }

  async fn fixture() -> Fixture {
    let config = VerifyConfig::default();
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let worlds = Arc::new(WorldLinkCache::with_expected_worlds(3));
    let emitter = Arc::new(EventEmitter::new(
      StatusResolver::new(config.freshness()),
      Arc::clone(&worlds),
      4,
    ));
    let grants = EphemeralService::new(
      Arc::clone(&store),
      Arc::clone(&emitter),
      Arc::clone(&worlds),
      config,
    );
    Fixture { store, emitter, worlds, grants }
  }

  fn sync_links(worlds: &WorldLinkCache) {
    worlds.apply(&[Matchup {
      id:       "2-1".into(),
      end_time: Utc::now() + ChronoDuration::days(3),
      worlds:   MatchupWorlds {
        red:   vec![2101, 2102],
        blue:  vec![2201],
        green: vec![2301],
      },
    }]);
  }

  fn by_access(access_type: AccessType) -> GrantRequest {
    GrantRequest { access_type: Some(access_type), ..GrantRequest::default() }
  }

  #[tokio::test]
  async fn home_world_grant_defaults_until_and_emits() {
    let f = fixture().await;
    let mut sub = f.emitter.subscribe_statuses("bot", Some(1), 2101).unwrap();

    let before = Utc::now();
    let until = f
      .grants
      .grant(2101, 1, "guest", by_access(AccessType::HomeWorld))
      .await
      .unwrap();
    assert!(until >= before + ChronoDuration::seconds(3_600));

    let update = sub.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert_eq!(update.status, Status::GrantedHomeWorldTemporary);

    let view = f.store.get_platform_user(1, "guest".into()).await.unwrap().unwrap();
    assert_eq!(view.ephemeral_associations[0].world, 2101);
  }

  #[tokio::test]
  async fn linked_world_grant_needs_synced_links() {
    let f = fixture().await;
    let err = f
      .grants
      .grant(2101, 1, "guest", by_access(AccessType::LinkedWorld))
      .await
      .unwrap_err();
    assert!(err.is_not_synced());

    sync_links(&f.worlds);
    f.grants
      .grant(2101, 1, "guest", by_access(AccessType::LinkedWorld))
      .await
      .unwrap();
    let view = f.store.get_platform_user(1, "guest".into()).await.unwrap().unwrap();
    assert_eq!(view.ephemeral_associations[0].world, 2102);

    let err = f
      .grants
      .grant(2201, 1, "guest", by_access(AccessType::LinkedWorld))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Rejected(_)));
  }

  #[tokio::test]
  async fn explicit_world_and_until_win() {
    let f = fixture().await;
    let until = Utc::now() + ChronoDuration::minutes(10);
    let request = GrantRequest {
      world:       Some(2202),
      access_type: Some(AccessType::HomeWorld),
      until:       Some(until),
    };
    let granted = f.grants.grant(2101, 1, "guest", request).await.unwrap();
    assert_eq!(granted, until);

    let view = f.store.get_platform_user(1, "guest".into()).await.unwrap().unwrap();
    assert_eq!(view.ephemeral_associations[0].world, 2202);
  }

  #[tokio::test]
  async fn bad_requests_are_rejected() {
    let f = fixture().await;
    let unknown = GrantRequest { world: Some(9999), ..GrantRequest::default() };
    assert!(matches!(
      f.grants.grant(2101, 1, "guest", unknown).await,
      Err(Error::Rejected(_))
    ));
    assert!(matches!(
      f.grants.grant(2101, 1, "guest", GrantRequest::default()).await,
      Err(Error::Rejected(_))
    ));
    let past = GrantRequest {
      access_type: Some(AccessType::HomeWorld),
      until: Some(Utc::now() - ChronoDuration::minutes(1)),
      ..GrantRequest::default()
    };
    assert!(matches!(
      f.grants.grant(2101, 1, "guest", past).await,
      Err(Error::Rejected(_))
    ));
  }
}

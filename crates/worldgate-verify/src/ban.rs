//! Bans by platform identity.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use worldgate_core::{
  model::{Ban, PlatformId},
  resolve::StatusResolver,
  store::VerifyStore,
};

use crate::{
  config::VerifyConfig,
  error::{Error, Result, store_call},
  events::EventEmitter,
};

pub struct BanService<S> {
  store:    Arc<S>,
  emitter:  Arc<EventEmitter>,
  resolver: StatusResolver,
  config:   VerifyConfig,
}

impl<S: VerifyStore> BanService<S> {
  pub fn new(store: Arc<S>, emitter: Arc<EventEmitter>, config: VerifyConfig) -> Self {
    Self {
      store,
      emitter,
      resolver: StatusResolver::new(config.freshness()),
      config,
    }
  }

  /// Ban the user behind a platform identity until `until` and notify
  /// listeners. The identity must already be known.
  pub async fn ban_platform_user(
    &self,
    platform_id: PlatformId,
    platform_user_id: &str,
    reason: String,
    until: DateTime<Utc>,
  ) -> Result<Ban> {
    let deadline = self.config.request_timeout();
    let link = store_call(
      deadline,
      "load platform link",
      self
        .store
        .get_platform_link(platform_id, platform_user_id.to_owned()),
    )
    .await?
    .ok_or_else(|| Error::NotFound(format!("platform user {platform_id}/{platform_user_id}")))?;

    let ban = store_call(deadline, "add ban", self.store.add_ban(link.user_id, reason, until))
      .await?;
    info!(user = %ban.user_id, until = %ban.until, "user banned");

    if let Some(mut view) =
      store_call(deadline, "load user", self.store.get_user(link.user_id)).await?
    {
      self.resolver.annotate(&mut view, Utc::now());
      self.emitter.emit(&view);
    }
    Ok(ban)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use chrono::Duration as ChronoDuration;
  use worldgate_core::Status;
  use worldgate_store_sqlite::SqliteStore;

  use super::*;
  use crate::worlds::WorldLinkCache;

  async fn service() -> (Arc<SqliteStore>, Arc<EventEmitter>, BanService<SqliteStore>) {
    let config = VerifyConfig::default();
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let emitter = Arc::new(EventEmitter::new(
      StatusResolver::new(config.freshness()),
      Arc::new(WorldLinkCache::with_expected_worlds(1)),
      4,
    ));
    let bans = BanService::new(Arc::clone(&store), Arc::clone(&emitter), config);
    (store, emitter, bans)
  }

  #[tokio::test]
  async fn ban_notifies_status_listeners() {
    let (store, emitter, bans) = service().await;
    store.link_platform_user(1, "griefer".into(), true).await.unwrap();

    let mut sub = emitter.subscribe_statuses("bot", Some(1), 2101).unwrap();
    let until = Utc::now() + ChronoDuration::days(7);
    let ban = bans
      .ban_platform_user(1, "griefer", "griefing".into(), until)
      .await
      .unwrap();
    assert_eq!(ban.reason, "griefing");

    let update = sub.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert_eq!(update.status, Status::DeniedBanned);
    assert_eq!(update.ban.unwrap().ban_id, ban.ban_id);
  }

  #[tokio::test]
  async fn unknown_identity_is_not_found() {
    let (_, _, bans) = service().await;
    let err = bans
      .ban_platform_user(1, "ghost", "r".into(), Utc::now())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
  }
}

//! Linking a submitted API key to a platform identity.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;
use worldgate_core::{
  fetch::{AccountFetcher, FetchError, RemoteAccount},
  model::{PlatformId, TokenInfo, UserView},
  restrict::{KeyOwner, RestrictionPolicy},
  resolve::StatusResolver,
  store::{NewApiKey, VerifyStore},
  world::WorldId,
};

use crate::{
  config::VerifyConfig,
  error::{Error, Result, fetch_call, store_call},
  events::EventEmitter,
  sync::account_snapshot,
};

/// A key submitted for a platform identity.
#[derive(Debug, Clone)]
pub struct LinkRequest {
  /// World the key name is derived for, when the caller has one.
  pub perspective:       Option<WorldId>,
  pub platform_id:       PlatformId,
  pub platform_user_id:  String,
  pub primary:           bool,
  pub api_key:           String,
  pub skip_requirements: bool,
}

pub struct Linker<S, F> {
  store:    Arc<S>,
  fetcher:  Arc<F>,
  emitter:  Arc<EventEmitter>,
  resolver: StatusResolver,
  policy:   RestrictionPolicy,
  config:   VerifyConfig,
}

impl<S: VerifyStore, F: AccountFetcher> Linker<S, F> {
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
      policy: config.restriction_policy(),
      config,
    }
  }

  /// Validate the key against the remote API and the restriction policy,
  /// then store it with its account in one transaction.
  ///
  /// Policy failures and rejected keys come back as [`Error::Rejected`].
  pub async fn link_api_key(&self, request: LinkRequest) -> Result<UserView> {
    let deadline = self.config.request_timeout();
    let api_key: String = request
      .api_key
      .chars()
      .filter(|c| !c.is_whitespace())
      .collect();
    if api_key.is_empty() {
      return Err(Error::Rejected("api key is empty".into()));
    }

    let info = fetch_call(deadline, "fetch token info", self.fetcher.token_info(&api_key))
      .await
      .map_err(user_facing)?;
    let remote = fetch_call(deadline, "fetch account", self.fetcher.account(&api_key))
      .await
      .map_err(user_facing)?;

    if request.skip_requirements || self.config.skip_restrictions {
      debug!(account = %remote.id, "restrictions skipped");
    } else {
      self.policy.check_api_key(&info, KeyOwner {
        perspective:      request.perspective,
        platform_id:      request.platform_id,
        platform_user_id: &request.platform_user_id,
      })?;
      self.policy.check_account(&remote)?;
      if self.policy.needs_character_check(&remote) {
        let level = self.highest_level(&api_key, &remote).await?;
        self.policy.check_characters(&remote, level)?;
      }
    }

    let now = Utc::now();
    let mut old = store_call(
      deadline,
      "load platform user",
      self
        .store
        .get_platform_user(request.platform_id, request.platform_user_id.clone()),
    )
    .await?;

    let token = TokenInfo {
      token_id:     info.id,
      account_id:   Some(remote.id.clone()),
      api_key,
      name:         info.name,
      permissions:  info.permissions,
      last_attempt: Some(now),
      last_success: Some(now),
    };
    let user = store_call(
      deadline,
      "save api key",
      self.store.save_api_key(NewApiKey {
        platform_id: request.platform_id,
        platform_user_id: request.platform_user_id,
        primary: request.primary,
        account: account_snapshot(&remote, Uuid::nil(), now),
        token,
      }),
    )
    .await?;
    info!(user = %user.user_id, account = %remote.id, world = remote.world, "api key linked");

    let mut new = store_call(deadline, "load user", self.store.get_user(user.user_id))
      .await?
      .ok_or_else(|| Error::NotFound(format!("user {}", user.user_id)))?;
    if let Some(old) = &mut old {
      self.resolver.annotate(old, now);
    }
    self.resolver.annotate(&mut new, now);
    self.emitter.process(old.as_ref(), &new);
    Ok(new)
  }

  /// Highest character level on the account, stopping early once the
  /// policy minimum is met.
  async fn highest_level(&self, api_key: &str, remote: &RemoteAccount) -> Result<i32> {
    let deadline = self.config.request_timeout();
    let names = fetch_call(deadline, "fetch characters", self.fetcher.characters(api_key))
      .await
      .map_err(user_facing)?;

    let mut highest = 0;
    for name in &names {
      let core = fetch_call(
        deadline,
        "fetch character",
        self.fetcher.character_core(api_key, name),
      )
      .await
      .map_err(user_facing)?;
      highest = highest.max(core.level);
      if highest >= self.policy.free_to_play_min_level {
        break;
      }
    }
    debug!(account = %remote.id, characters = names.len(), highest, "character levels checked");
    Ok(highest)
  }
}

fn user_facing(e: Error) -> Error {
  match e {
    Error::Fetch(FetchError::InvalidKey) => Error::Rejected("invalid api key".into()),
    other => other,
  }
}

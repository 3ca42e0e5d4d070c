//! Change notification: listener registries for raw user changes and for
//! personalised verification status changes.
//!
//! Every subscriber id owns one bounded queue. Delivery never blocks: when a
//! queue is full the notification is dropped and a warning logged.
//!
//! A long-poll checks the queue's receiver out of the registry for the
//! duration of the poll. Check-out happens under the registry lock, so two
//! polls for one subscriber id can never share a queue; the second one is
//! refused with [`Error::Busy`].
//!
//! A queue that sits returned and unpolled for longer than the idle timeout
//! is dropped on the next broadcast.

use std::{
  collections::{BTreeSet, HashMap},
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
  sync::mpsc::{self, error::TrySendError},
  time::Instant,
};
use tracing::{debug, warn};
use worldgate_core::{
  model::{PlatformId, UserView, VerificationUpdate},
  resolve::StatusResolver,
  world::WorldId,
};

use crate::{
  error::{Error, Result},
  worlds::WorldLinkCache,
};

// ─── Registry ────────────────────────────────────────────────────────────────

/// What a listener is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
  /// Only fire for users linked on this platform.
  pub platform:    Option<PlatformId>,
  pub perspective: Option<WorldId>,
}

struct Slot<T> {
  scope:      Scope,
  tx:         mpsc::Sender<T>,
  /// `None` while a poll has it checked out.
  rx:         Option<mpsc::Receiver<T>>,
  /// When the last poll gave the receiver back.
  idle_since: Option<Instant>,
}

impl<T> Slot<T> {
  fn is_stale(&self, now: Instant, idle_timeout: Option<Duration>) -> bool {
    match (self.idle_since, idle_timeout) {
      (Some(since), Some(limit)) => now.saturating_duration_since(since) > limit,
      _ => false,
    }
  }
}

/// Subscriber id → bounded queue.
pub struct Registry<T> {
  slots:        Mutex<HashMap<String, Slot<T>>>,
  capacity:     usize,
  idle_timeout: Option<Duration>,
  kind:         &'static str,
}

impl<T> Registry<T> {
  pub fn new(kind: &'static str, capacity: usize) -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
      capacity: capacity.max(1),
      idle_timeout: None,
      kind,
    }
  }

  /// Drop queues nobody has polled for longer than `timeout`.
  pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
    self.idle_timeout = Some(timeout);
    self
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot<T>>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register `subscriber` (or reuse its queue) and check out its receiver.
  ///
  /// A subscriber whose scope changed gets a fresh queue; anything queued
  /// under the old scope is discarded.
  pub fn subscribe(&self, subscriber: &str, scope: Scope) -> Result<Subscription<'_, T>> {
    let mut slots = self.lock();

    let reuse = match slots.get(subscriber) {
      Some(slot) if slot.rx.is_none() => return Err(Error::Busy(subscriber.to_owned())),
      Some(slot) => slot.scope == scope,
      None => false,
    };

    let rx = if reuse {
      slots.get_mut(subscriber).and_then(|slot| {
        slot.idle_since = None;
        slot.rx.take()
      })
    } else {
      let (tx, rx) = mpsc::channel(self.capacity);
      slots.insert(subscriber.to_owned(), Slot { scope, tx, rx: None, idle_since: None });
      Some(rx)
    };

    Ok(Subscription { registry: self, subscriber: subscriber.to_owned(), rx })
  }

  /// Offer one payload to every listener. `payload` sees each listener's
  /// scope and returns `None` to skip it.
  pub fn broadcast(&self, mut payload: impl FnMut(Scope) -> Option<T>) -> usize {
    let mut slots = self.lock();
    let now = Instant::now();
    slots.retain(|subscriber, slot| {
      let stale = slot.is_stale(now, self.idle_timeout);
      if stale {
        debug!(kind = self.kind, subscriber = %subscriber, "idle listener pruned");
      }
      !stale
    });

    let mut delivered = 0;
    for (subscriber, slot) in slots.iter() {
      let Some(item) = payload(slot.scope) else { continue };
      match slot.tx.try_send(item) {
        Ok(()) => delivered += 1,
        Err(TrySendError::Full(_)) => {
          warn!(kind = self.kind, subscriber = %subscriber, "listener queue full; notification dropped");
        }
        Err(TrySendError::Closed(_)) => {}
      }
    }
    delivered
  }

  pub fn len(&self) -> usize { self.lock().len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  fn give_back(&self, subscriber: &str, rx: mpsc::Receiver<T>) {
    if let Some(slot) = self.lock().get_mut(subscriber) {
      slot.rx.get_or_insert(rx);
      slot.idle_since = Some(Instant::now());
    }
  }

  fn remove(&self, subscriber: &str) { self.lock().remove(subscriber); }
}

/// A checked-out listener queue.
///
/// Dropping the subscription returns the queue to the registry, so events
/// arriving between two polls are kept. [`close`](Self::close) removes the
/// registration instead.
pub struct Subscription<'a, T> {
  registry:   &'a Registry<T>,
  subscriber: String,
  rx:         Option<mpsc::Receiver<T>>,
}

impl<T> Subscription<'_, T> {
  /// Wait up to `timeout` for the next notification.
  pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<T> {
    let rx = self.rx.as_mut()?;
    tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
  }

  /// Deregister the subscriber entirely.
  pub fn close(mut self) {
    self.rx = None;
    self.registry.remove(&self.subscriber);
    debug!(kind = self.registry.kind, subscriber = %self.subscriber, "listener removed");
  }
}

impl<T> Drop for Subscription<'_, T> {
  fn drop(&mut self) {
    if let Some(rx) = self.rx.take() {
      self.registry.give_back(&self.subscriber, rx);
    }
  }
}

// ─── Emitter ─────────────────────────────────────────────────────────────────

/// Fans user changes out to both listener kinds.
pub struct EventEmitter {
  users:    Registry<Arc<UserView>>,
  statuses: Registry<VerificationUpdate>,
  resolver: StatusResolver,
  worlds:   Arc<WorldLinkCache>,
}

impl EventEmitter {
  pub fn new(
    resolver: StatusResolver,
    worlds: Arc<WorldLinkCache>,
    capacity: usize,
  ) -> Self {
    Self {
      users: Registry::new("user", capacity),
      statuses: Registry::new("status", capacity),
      resolver,
      worlds,
    }
  }

  /// Prune listeners that have not polled within `timeout`.
  pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
    self.users = self.users.with_idle_timeout(timeout);
    self.statuses = self.statuses.with_idle_timeout(timeout);
    self
  }

  pub fn subscribe_users(
    &self,
    subscriber: &str,
    platform: Option<PlatformId>,
  ) -> Result<Subscription<'_, Arc<UserView>>> {
    self
      .users
      .subscribe(subscriber, Scope { platform, perspective: None })
  }

  pub fn subscribe_statuses(
    &self,
    subscriber: &str,
    platform: Option<PlatformId>,
    perspective: WorldId,
  ) -> Result<Subscription<'_, VerificationUpdate>> {
    self.statuses.subscribe(subscriber, Scope {
      platform,
      perspective: Some(perspective),
    })
  }

  /// Deliver `view` to every matching listener.
  pub fn emit(&self, view: &UserView) { self.emit_at(view, Utc::now()) }

  pub fn emit_at(&self, view: &UserView, now: DateTime<Utc>) {
    let shared = Arc::new(view.clone());
    let users = self.users.broadcast(|scope| {
      in_scope(view, scope).then(|| Arc::clone(&shared))
    });

    let links = self.worlds.snapshot();
    let ban = view.active_ban(now).cloned();
    let statuses = self.statuses.broadcast(|scope| {
      if !in_scope(view, scope) {
        return None;
      }
      let perspective = scope.perspective?;
      Some(VerificationUpdate {
        user_id:       view.user_id(),
        status:        self.resolver.resolve(perspective, view, links.as_deref(), now),
        ban:           ban.clone(),
        platform_link: scope
          .platform
          .and_then(|p| view.link_on(p))
          .cloned(),
      })
    });

    debug!(user = %view.user_id(), users, statuses, "user change emitted");
  }

  /// Emit `new` if it differs from `old` in a way listeners care about.
  /// Both views should already carry their `expired` flags.
  pub fn process(&self, old: Option<&UserView>, new: &UserView) -> bool {
    let emit = should_emit(old, new);
    if emit {
      self.emit(new);
    }
    emit
  }
}

fn in_scope(view: &UserView, scope: Scope) -> bool {
  scope.platform.is_none_or(|p| view.link_on(p).is_some())
}

/// Whether the change from `old` to `new` is worth a notification.
pub fn should_emit(old: Option<&UserView>, new: &UserView) -> bool {
  let Some(old) = old else { return true };

  if old.bans.len() != new.bans.len() {
    return true;
  }

  if old.accounts.len() != new.accounts.len() {
    return true;
  }
  for account in &new.accounts {
    let Some(before) = old.accounts.iter().find(|a| a.account_id == account.account_id) else {
      return true;
    };
    if before.world != account.world || before.name != account.name {
      return true;
    }
    if !before.expired && account.expired {
      return true;
    }
  }

  let grants = |v: &UserView| -> BTreeSet<(WorldId, DateTime<Utc>)> {
    v.ephemeral_associations
      .iter()
      .map(|e| (e.world, e.until))
      .collect()
  };
  old.ephemeral_associations.len() != new.ephemeral_associations.len()
    || grants(old) != grants(new)
}

#[cfg(test)]
mod tests {
  use chrono::Duration as ChronoDuration;
  use uuid::Uuid;
  use worldgate_core::{
    Status,
    model::{Account, Ban, EphemeralAssociation, PlatformLink, User},
  };

  use super::*;

  const WAIT: Duration = Duration::from_millis(50);

  fn emitter(capacity: usize) -> EventEmitter {
    EventEmitter::new(
      StatusResolver::new(ChronoDuration::hours(24)),
      Arc::new(WorldLinkCache::with_expected_worlds(1)),
      capacity,
    )
  }

  fn view_on(platform: PlatformId) -> UserView {
    let now = Utc::now();
    let mut view = UserView::new(User { user_id: Uuid::new_v4(), created_at: now });
    view.platform_links.push(PlatformLink {
      platform_id: platform,
      platform_user_id: "someone".into(),
      user_id: view.user_id(),
      primary: true,
      linked_at: now,
    });
    view
  }

  fn account(view: &UserView, world: WorldId) -> Account {
    Account {
      account_id:   "acc-1".into(),
      user_id:      view.user_id(),
      name:         "Someone.1234".into(),
      world,
      age_secs:     0,
      access:       vec!["GuildWars2".into()],
      commander:    false,
      wvw_rank:     0,
      wvw_team_id:  None,
      wvw_guild_id: None,
      guilds:       vec![],
      created:      None,
      synced_at:    Utc::now(),
      last_credential_success: None,
      expired:      false,
    }
  }

  #[tokio::test]
  async fn status_listeners_get_their_own_perspective() {
    let emitter = emitter(4);
    let mut view = view_on(1);
    view.accounts.push(account(&view, 2101));

    let mut home = emitter.subscribe_statuses("home", Some(1), 2101).unwrap();
    let mut away = emitter.subscribe_statuses("away", None, 2202).unwrap();
    let mut other_platform = emitter.subscribe_statuses("elsewhere", Some(9), 2101).unwrap();

    emitter.emit(&view);

    let update = home.recv_timeout(WAIT).await.unwrap();
    assert_eq!(update.status, Status::GrantedHomeWorld);
    assert_eq!(update.platform_link.unwrap().platform_user_id, "someone");

    // Links are not synchronised, so a foreign world cannot be judged.
    let update = away.recv_timeout(WAIT).await.unwrap();
    assert_eq!(update.status, Status::DeniedUnknown);
    assert!(update.platform_link.is_none());

    assert!(other_platform.recv_timeout(WAIT).await.is_none());
  }

  #[tokio::test]
  async fn banned_update_carries_the_ban() {
    let emitter = emitter(4);
    let mut view = view_on(1);
    let now = Utc::now();
    view.bans.push(Ban {
      ban_id:     Uuid::new_v4(),
      user_id:    view.user_id(),
      reason:     "spam".into(),
      until:      now + ChronoDuration::days(1),
      created_at: now,
    });

    let mut sub = emitter.subscribe_statuses("bot", Some(1), 2101).unwrap();
    emitter.emit_at(&view, now);
    let update = sub.recv_timeout(WAIT).await.unwrap();
    assert_eq!(update.status, Status::DeniedBanned);
    assert_eq!(update.ban.unwrap().reason, "spam");
  }

  #[tokio::test]
  async fn full_queue_drops_without_blocking() {
    let emitter = emitter(2);
    let view = view_on(1);
    let sub = emitter.subscribe_users("slow", None).unwrap();
    drop(sub);

    for _ in 0..3 {
      emitter.emit(&view);
    }

    let mut sub = emitter.subscribe_users("slow", None).unwrap();
    assert!(sub.recv_timeout(WAIT).await.is_some());
    assert!(sub.recv_timeout(WAIT).await.is_some());
    assert!(sub.recv_timeout(WAIT).await.is_none(), "third emission was dropped");
  }

  #[tokio::test]
  async fn concurrent_poll_is_refused() {
    let emitter = emitter(2);
    let first = emitter.subscribe_users("bot", Some(1)).unwrap();
    assert!(matches!(
      emitter.subscribe_users("bot", Some(1)),
      Err(Error::Busy(id)) if id == "bot"
    ));

    drop(first);
    assert!(emitter.subscribe_users("bot", Some(1)).is_ok());
  }

  #[tokio::test]
  async fn closing_deregisters() {
    let emitter = emitter(2);
    let mut sub = emitter.subscribe_users("bot", None).unwrap();
    assert!(sub.recv_timeout(Duration::from_millis(5)).await.is_none());
    sub.close();
    assert!(emitter.users.is_empty());

    // Nothing is queued for a closed subscriber.
    emitter.emit(&view_on(1));
    let mut sub = emitter.subscribe_users("bot", None).unwrap();
    assert!(sub.recv_timeout(Duration::from_millis(5)).await.is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn unpolled_listener_is_pruned() {
    let emitter = emitter(2).with_idle_timeout(Duration::from_secs(120));
    drop(emitter.subscribe_users("gone", None).unwrap());
    let polling = emitter.subscribe_users("polling", None).unwrap();

    tokio::time::advance(Duration::from_secs(60)).await;
    emitter.emit(&view_on(1));
    assert_eq!(emitter.users.len(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;
    emitter.emit(&view_on(1));
    assert_eq!(emitter.users.len(), 1, "checked-out queues are never pruned");

    drop(polling);
    drop(emitter.subscribe_users("gone", None).unwrap());
    assert_eq!(emitter.users.len(), 2);
  }

  #[test]
  fn scope_change_replaces_queue() {
    let emitter = emitter(2);
    drop(emitter.subscribe_statuses("bot", Some(1), 2101).unwrap());
    emitter.emit(&view_on(1));
    drop(emitter.subscribe_statuses("bot", Some(1), 2202).unwrap());
    assert_eq!(emitter.statuses.len(), 1);
  }

  // ── should_emit ───────────────────────────────────────────────────────

  #[test]
  fn first_sighting_emits() {
    assert!(should_emit(None, &view_on(1)));
  }

  #[test]
  fn unchanged_view_is_quiet() {
    let mut view = view_on(1);
    view.accounts.push(account(&view, 2101));
    let mut later = view.clone();
    later.accounts[0].synced_at += ChronoDuration::minutes(5);
    later.accounts[0].wvw_rank = 100;
    assert!(!should_emit(Some(&view), &later));
  }

  #[test]
  fn world_name_and_expiry_changes_emit() {
    let mut view = view_on(1);
    view.accounts.push(account(&view, 2101));

    let mut moved = view.clone();
    moved.accounts[0].world = 2102;
    assert!(should_emit(Some(&view), &moved));

    let mut renamed = view.clone();
    renamed.accounts[0].name = "Other.5678".into();
    assert!(should_emit(Some(&view), &renamed));

    let mut expired = view.clone();
    expired.accounts[0].expired = true;
    assert!(should_emit(Some(&view), &expired));
    assert!(!should_emit(Some(&expired), &view), "un-expiring is quiet");
  }

  #[test]
  fn ban_and_grant_changes_emit() {
    let view = view_on(1);
    let now = Utc::now();

    let mut banned = view.clone();
    banned.bans.push(Ban {
      ban_id:     Uuid::new_v4(),
      user_id:    view.user_id(),
      reason:     "r".into(),
      until:      now,
      created_at: now,
    });
    assert!(should_emit(Some(&view), &banned));

    let grant = EphemeralAssociation {
      association_id: Uuid::new_v4(),
      user_id:        view.user_id(),
      world:          2101,
      until:          now + ChronoDuration::hours(1),
      created_at:     now,
    };
    let mut granted = view.clone();
    granted.ephemeral_associations.push(grant.clone());
    assert!(should_emit(Some(&view), &granted));

    let mut extended = granted.clone();
    extended.ephemeral_associations[0].until += ChronoDuration::hours(1);
    assert!(should_emit(Some(&granted), &extended));

    let mut same = granted.clone();
    same.ephemeral_associations[0].association_id = Uuid::new_v4();
    assert!(!should_emit(Some(&granted), &same));
  }
}

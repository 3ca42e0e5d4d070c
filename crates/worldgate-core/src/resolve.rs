//! The status resolver: a pure function from (perspective world, user
//! snapshot, world links, clock) to a [`Status`].

use chrono::{DateTime, Duration, Utc};

use crate::{
  model::{Account, UserView},
  status::Status,
  world::{WorldId, WorldLinkMap},
};

#[derive(Debug, Clone, Copy)]
pub struct StatusResolver {
  freshness: Duration,
}

impl StatusResolver {
  pub fn new(freshness: Duration) -> Self { Self { freshness } }

  pub fn freshness(&self) -> Duration { self.freshness }

  /// Account data is expired when neither the snapshot itself nor any of its
  /// credentials has been refreshed within the freshness window.
  pub fn is_expired(&self, account: &Account, now: DateTime<Utc>) -> bool {
    let refreshed = match account.last_credential_success {
      Some(success) => success.max(account.synced_at),
      None => account.synced_at,
    };
    now - refreshed > self.freshness
  }

  /// Fill in the derived `expired` flag on every account of `view`.
  pub fn annotate(&self, view: &mut UserView, now: DateTime<Utc>) {
    for account in &mut view.accounts {
      account.expired = self.is_expired(account, now);
    }
  }

  /// Evaluate `view` from the point of view of `perspective`.
  ///
  /// `links` is `None` while the world-link cache has not synchronised; a
  /// home-world match still grants, anything that would need the links
  /// degrades to [`Status::DeniedUnknown`].
  pub fn resolve(
    &self,
    perspective: WorldId,
    view: &UserView,
    links: Option<&WorldLinkMap>,
    now: DateTime<Utc>,
  ) -> Status {
    if view.active_ban(now).is_some() {
      return Status::DeniedBanned;
    }

    let accounts = view.accounts.iter().map(|account| {
      if self.is_expired(account, now) {
        Status::DeniedExpired
      } else {
        evaluate_world(
          perspective,
          account.world,
          links,
          Status::GrantedHomeWorld,
          Status::GrantedLinkedWorld,
        )
      }
    });
    let best = accounts.max();
    if best.is_some_and(Status::is_granted) {
      return best.unwrap_or_default();
    }

    let temporary = view.active_ephemerals(now).map(|grant| {
      evaluate_world(
        perspective,
        grant.world,
        links,
        Status::GrantedHomeWorldTemporary,
        Status::GrantedLinkedWorldTemporary,
      )
    });

    match best.into_iter().chain(temporary).max() {
      Some(status) => status,
      None => Status::DeniedAccountNotLinked,
    }
  }
}

fn evaluate_world(
  perspective: WorldId,
  world: WorldId,
  links: Option<&WorldLinkMap>,
  home: Status,
  linked: Status,
) -> Status {
  if world == perspective {
    return home;
  }
  match links {
    None => Status::DeniedUnknown,
    Some(map) if map.is_linked(perspective, world) => linked,
    Some(_) => Status::DeniedInvalidWorld,
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;

  use uuid::Uuid;

  use super::*;
  use crate::model::{Ban, EphemeralAssociation, User};

  const HOME: WorldId = 2101;
  const LINKED: WorldId = 2102;
  const OTHER: WorldId = 2201;

  fn resolver() -> StatusResolver { StatusResolver::new(Duration::hours(24)) }

  fn links() -> WorldLinkMap {
    let mut map = WorldLinkMap::default();
    let group = [HOME, LINKED, 2103];
    for &w in &group {
      map
        .links
        .insert(w, group.iter().copied().filter(|&o| o != w).collect());
    }
    map.links.insert(OTHER, BTreeSet::new());
    map
  }

  fn view() -> UserView {
    UserView::new(User { user_id: Uuid::new_v4(), created_at: Utc::now() })
  }

  fn account(view: &UserView, world: WorldId, synced_at: DateTime<Utc>) -> Account {
    Account {
      account_id: Uuid::new_v4().to_string(),
      user_id: view.user_id(),
      name: "Someone.1234".into(),
      world,
      age_secs: 0,
      access: vec!["GuildWars2".into()],
      commander: false,
      wvw_rank: 0,
      wvw_team_id: None,
      wvw_guild_id: None,
      guilds: vec![],
      created: None,
      synced_at,
      last_credential_success: None,
      expired: false,
    }
  }

  fn grant(view: &UserView, world: WorldId, until: DateTime<Utc>) -> EphemeralAssociation {
    EphemeralAssociation {
      association_id: Uuid::new_v4(),
      user_id: view.user_id(),
      world,
      until,
      created_at: Utc::now(),
    }
  }

  #[test]
  fn nothing_linked() {
    let now = Utc::now();
    assert_eq!(
      resolver().resolve(HOME, &view(), Some(&links()), now),
      Status::DeniedAccountNotLinked
    );
  }

  #[test]
  fn active_ban_wins_over_home_world() {
    let now = Utc::now();
    let mut v = view();
    v.accounts.push(account(&v, HOME, now));
    v.bans.push(Ban {
      ban_id:     Uuid::new_v4(),
      user_id:    v.user_id(),
      reason:     "spam".into(),
      until:      now + Duration::minutes(5),
      created_at: now,
    });
    assert_eq!(resolver().resolve(HOME, &v, Some(&links()), now), Status::DeniedBanned);
  }

  #[test]
  fn expired_ban_is_ignored() {
    let now = Utc::now();
    let mut v = view();
    v.accounts.push(account(&v, HOME, now));
    v.bans.push(Ban {
      ban_id:     Uuid::new_v4(),
      user_id:    v.user_id(),
      reason:     "spam".into(),
      until:      now - Duration::seconds(1),
      created_at: now - Duration::days(1),
    });
    assert_eq!(
      resolver().resolve(HOME, &v, Some(&links()), now),
      Status::GrantedHomeWorld
    );
  }

  #[test]
  fn home_and_linked_worlds() {
    let now = Utc::now();
    let map = links();
    let mut on_home = view();
    on_home.accounts.push(account(&on_home, HOME, now));
    let mut on_linked = view();
    on_linked.accounts.push(account(&on_linked, LINKED, now));

    let r = resolver();
    assert_eq!(r.resolve(HOME, &on_home, Some(&map), now), Status::GrantedHomeWorld);
    assert_eq!(r.resolve(HOME, &on_linked, Some(&map), now), Status::GrantedLinkedWorld);
    assert_eq!(r.resolve(LINKED, &on_home, Some(&map), now), Status::GrantedLinkedWorld);
    assert_eq!(r.resolve(OTHER, &on_home, Some(&map), now), Status::DeniedInvalidWorld);
  }

  #[test]
  fn unsynced_links_only_degrade_linked_evaluation() {
    let now = Utc::now();
    let mut v = view();
    v.accounts.push(account(&v, LINKED, now));
    let r = resolver();
    assert_eq!(r.resolve(HOME, &v, None, now), Status::DeniedUnknown);
    assert_eq!(r.resolve(LINKED, &v, None, now), Status::GrantedHomeWorld);
  }

  #[test]
  fn stale_account_is_expired_unless_a_credential_refreshed_it() {
    let now = Utc::now();
    let mut v = view();
    v.accounts.push(account(&v, HOME, now - Duration::hours(30)));
    let r = resolver();
    assert_eq!(r.resolve(HOME, &v, Some(&links()), now), Status::DeniedExpired);

    v.accounts[0].last_credential_success = Some(now - Duration::hours(1));
    assert_eq!(r.resolve(HOME, &v, Some(&links()), now), Status::GrantedHomeWorld);

    r.annotate(&mut v, now);
    assert!(!v.accounts[0].expired);
  }

  #[test]
  fn highest_priority_account_wins_regardless_of_order() {
    let now = Utc::now();
    let map = links();
    let mut v = view();
    v.accounts.push(account(&v, OTHER, now));
    v.accounts.push(account(&v, LINKED, now));
    v.accounts.push(account(&v, HOME, now - Duration::days(3)));
    v.accounts.push(account(&v, HOME, now));

    let r = resolver();
    let forward = r.resolve(HOME, &v, Some(&map), now);
    v.accounts.reverse();
    let backward = r.resolve(HOME, &v, Some(&map), now);
    assert_eq!(forward, Status::GrantedHomeWorld);
    assert_eq!(forward, backward);
  }

  #[test]
  fn temporary_grant_until_expiry() {
    let now = Utc::now();
    let map = links();
    let mut v = view();
    v.ephemeral_associations.push(grant(&v, HOME, now + Duration::seconds(1)));
    let r = resolver();
    assert_eq!(
      r.resolve(HOME, &v, Some(&map), now),
      Status::GrantedHomeWorldTemporary
    );
    assert_eq!(
      r.resolve(LINKED, &v, Some(&map), now),
      Status::GrantedLinkedWorldTemporary
    );

    let later = now + Duration::seconds(1);
    assert_eq!(r.resolve(HOME, &v, Some(&map), later), Status::DeniedAccountNotLinked);
  }

  #[test]
  fn temporary_grant_applies_only_without_granted_account() {
    let now = Utc::now();
    let map = links();
    let mut v = view();
    v.accounts.push(account(&v, OTHER, now));
    v.ephemeral_associations.push(grant(&v, HOME, now + Duration::hours(1)));
    let r = resolver();
    assert_eq!(
      r.resolve(HOME, &v, Some(&map), now),
      Status::GrantedHomeWorldTemporary
    );

    v.accounts.push(account(&v, LINKED, now));
    assert_eq!(r.resolve(HOME, &v, Some(&map), now), Status::GrantedLinkedWorld);
  }
}

//! Worlds: the static catalog, name normalisation, and the link map derived
//! from the competitive matchup schedule.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fetch::Matchup;

pub type WorldId = i32;

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// A game world ("server").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct World {
  pub id:   WorldId,
  pub name: &'static str,
}

impl World {
  /// The world name reduced to ASCII letters, with bracketed region tags
  /// removed: `"Jade Sea [FR]"` becomes `"JadeSea"`.
  pub fn normalized_name(&self) -> String {
    let mut out = String::with_capacity(self.name.len());
    let mut depth = 0usize;
    for c in self.name.chars() {
      match c {
        '[' => depth += 1,
        ']' => depth = depth.saturating_sub(1),
        c if depth == 0 && c.is_ascii_alphabetic() => out.push(c),
        _ => {}
      }
    }
    out
  }
}

/// Every world known to the game. The world-link cache refuses to commit a
/// matchup set that does not cover at least this many worlds.
pub const WORLDS: &[World] = &[
  World { id: 1001, name: "Anvil Rock" },
  World { id: 1002, name: "Borlis Pass" },
  World { id: 1003, name: "Yak's Bend" },
  World { id: 1004, name: "Henge of Denravi" },
  World { id: 1005, name: "Maguuma" },
  World { id: 1006, name: "Sorrow's Furnace" },
  World { id: 1007, name: "Gate of Madness" },
  World { id: 1008, name: "Jade Quarry" },
  World { id: 1009, name: "Fort Aspenwood" },
  World { id: 1010, name: "Ehmry Bay" },
  World { id: 1011, name: "Stormbluff Isle" },
  World { id: 1012, name: "Darkhaven" },
  World { id: 1013, name: "Sanctum of Rall" },
  World { id: 1014, name: "Crystal Desert" },
  World { id: 1015, name: "Isle of Janthir" },
  World { id: 1016, name: "Sea of Sorrows" },
  World { id: 1017, name: "Tarnished Coast" },
  World { id: 1018, name: "Northern Shiverpeaks" },
  World { id: 1019, name: "Blackgate" },
  World { id: 1020, name: "Ferguson's Crossing" },
  World { id: 1021, name: "Dragonbrand" },
  World { id: 1022, name: "Kaineng" },
  World { id: 1023, name: "Devona's Rest" },
  World { id: 1024, name: "Eredon Terrace" },
  World { id: 2001, name: "Fissure of Woe" },
  World { id: 2002, name: "Desolation" },
  World { id: 2003, name: "Gandara" },
  World { id: 2004, name: "Blacktide" },
  World { id: 2005, name: "Ring of Fire" },
  World { id: 2006, name: "Underworld" },
  World { id: 2007, name: "Far Shiverpeaks" },
  World { id: 2008, name: "Whiteside Ridge" },
  World { id: 2009, name: "Ruins of Surmia" },
  World { id: 2010, name: "Seafarer's Rest" },
  World { id: 2011, name: "Vabbi" },
  World { id: 2012, name: "Piken Square" },
  World { id: 2013, name: "Aurora Glade" },
  World { id: 2014, name: "Gunnar's Hold" },
  World { id: 2101, name: "Jade Sea [FR]" },
  World { id: 2102, name: "Fort Ranik [FR]" },
  World { id: 2103, name: "Augury Rock [FR]" },
  World { id: 2104, name: "Vizunah Square [FR]" },
  World { id: 2105, name: "Arborstone [FR]" },
  World { id: 2201, name: "Kodash [DE]" },
  World { id: 2202, name: "Riverside [DE]" },
  World { id: 2203, name: "Elona Reach [DE]" },
  World { id: 2204, name: "Abaddon's Mouth [DE]" },
  World { id: 2205, name: "Drakkar Lake [DE]" },
  World { id: 2206, name: "Miller's Sound [DE]" },
  World { id: 2207, name: "Dzagonur [DE]" },
  World { id: 2301, name: "Baruch Bay [SP]" },
];

/// Look up a world in the catalog.
pub fn find_world(id: WorldId) -> Option<&'static World> {
  WORLDS.iter().find(|w| w.id == id)
}

/// Normalised name of a catalog world, or an empty string for unknown ids.
pub fn normalized_world_name(id: WorldId) -> String {
  find_world(id).map(World::normalized_name).unwrap_or_default()
}

// ─── Link map ────────────────────────────────────────────────────────────────

/// World id → the set of worlds currently fighting on the same side.
///
/// Symmetric by construction: if A lists B then B lists A. Rebuilt wholesale
/// on every committed refresh, never patched in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldLinkMap {
  pub links:      BTreeMap<WorldId, BTreeSet<WorldId>>,
  /// Earliest matchup end time observed; the links are stale after this.
  pub expires_at: Option<DateTime<Utc>>,
}

/// Result of [`WorldLinkMap::build`].
#[derive(Debug, Clone)]
pub struct LinkBuild {
  pub map:            WorldLinkMap,
  /// Number of distinct worlds seen across all matchups.
  pub distinct_worlds: usize,
}

impl WorldLinkMap {
  /// Build a fresh map from a matchup schedule.
  ///
  /// Every catalog world starts with an empty link set so that a known world
  /// absent from the schedule reads as "linked to nothing". Within each
  /// faction of each matchup, every world is linked to every *other* world
  /// of that faction.
  pub fn build(matchups: &[Matchup], catalog: &[World]) -> LinkBuild {
    let mut links: BTreeMap<WorldId, BTreeSet<WorldId>> =
      catalog.iter().map(|w| (w.id, BTreeSet::new())).collect();
    let mut seen = BTreeSet::new();
    let mut expires_at: Option<DateTime<Utc>> = None;

    for matchup in matchups {
      for side in matchup.worlds.sides() {
        for &world in side {
          seen.insert(world);
          let entry = links.entry(world).or_default();
          entry.extend(side.iter().copied().filter(|&other| other != world));
        }
      }

      expires_at = Some(match expires_at {
        Some(current) => current.min(matchup.end_time),
        None => matchup.end_time,
      });
    }

    LinkBuild {
      map: WorldLinkMap { links, expires_at },
      distinct_worlds: seen.len(),
    }
  }

  /// Worlds linked to `world`, in ascending id order. Empty if none.
  pub fn links_for(&self, world: WorldId) -> Vec<WorldId> {
    self
      .links
      .get(&world)
      .map(|set| set.iter().copied().collect())
      .unwrap_or_default()
  }

  pub fn is_linked(&self, a: WorldId, b: WorldId) -> bool {
    self.links.get(&a).is_some_and(|set| set.contains(&b))
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::fetch::MatchupWorlds;

  fn matchup(id: &str, end_secs: i64, red: &[i32], blue: &[i32], green: &[i32]) -> Matchup {
    Matchup {
      id:       id.into(),
      end_time: Utc.timestamp_opt(end_secs, 0).unwrap(),
      worlds:   MatchupWorlds {
        red:   red.to_vec(),
        blue:  blue.to_vec(),
        green: green.to_vec(),
      },
    }
  }

  #[test]
  fn normalized_names_drop_tags_and_punctuation() {
    assert_eq!(normalized_world_name(1003), "YaksBend");
    assert_eq!(normalized_world_name(2101), "JadeSea");
    assert_eq!(normalized_world_name(2204), "AbaddonsMouth");
    assert_eq!(normalized_world_name(9999), "");
  }

  #[test]
  fn catalog_ids_are_unique() {
    let ids: BTreeSet<WorldId> = WORLDS.iter().map(|w| w.id).collect();
    assert_eq!(ids.len(), WORLDS.len());
    assert_eq!(WORLDS.len(), 51);
  }

  #[test]
  fn same_faction_worlds_link_symmetrically() {
    let build = WorldLinkMap::build(
      &[matchup("1-1", 1_000, &[1, 2, 3], &[4], &[5, 6])],
      &[],
    );
    let map = build.map;

    assert_eq!(map.links_for(1), vec![2, 3]);
    assert_eq!(map.links_for(2), vec![1, 3]);
    assert_eq!(map.links_for(6), vec![5]);
    assert!(map.links_for(4).is_empty());
    for (&world, others) in &map.links {
      assert!(!others.contains(&world), "world {world} linked to itself");
      for &other in others {
        assert!(map.is_linked(other, world), "{world}->{other} not symmetric");
      }
    }
    assert!(!map.is_linked(1, 4));
    assert_eq!(build.distinct_worlds, 6);
  }

  #[test]
  fn expiry_is_earliest_end_time() {
    let build = WorldLinkMap::build(
      &[
        matchup("1-1", 5_000, &[1], &[2], &[3]),
        matchup("2-1", 2_000, &[4], &[5], &[6]),
        matchup("2-2", 9_000, &[7], &[8], &[9]),
      ],
      &[],
    );
    assert_eq!(build.map.expires_at, Some(Utc.timestamp_opt(2_000, 0).unwrap()));
  }

  #[test]
  fn catalog_worlds_absent_from_schedule_have_empty_links() {
    let build = WorldLinkMap::build(&[], WORLDS);
    assert_eq!(build.map.links.len(), WORLDS.len());
    assert!(build.map.links_for(1001).is_empty());
    assert_eq!(build.distinct_worlds, 0);
    assert_eq!(build.map.expires_at, None);
  }
}

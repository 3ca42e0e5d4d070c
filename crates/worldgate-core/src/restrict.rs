//! Link-time policy checks on a submitted API key and its account.
//!
//! A failed check yields a [`Restriction`], whose description is safe to show
//! to the end user verbatim.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
  fetch::{RemoteAccount, RemoteTokenInfo},
  keyname::{api_key_code, api_key_name},
  model::{PlatformId, is_free_to_play},
  world::WorldId,
};

/// A user-facing policy failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
  pub description: String,
}

impl Restriction {
  pub fn new(description: impl Into<String>) -> Self {
    Self { description: description.into() }
  }
}

impl fmt::Display for Restriction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.description)
  }
}

impl std::error::Error for Restriction {}

/// Thresholds applied when a key is linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictionPolicy {
  pub required_permissions:      Vec<String>,
  pub free_to_play_min_wvw_rank: i32,
  pub free_to_play_min_level:    i32,
}

impl Default for RestrictionPolicy {
  fn default() -> Self {
    Self {
      required_permissions:      ["progression", "characters", "wvw"]
        .map(String::from)
        .to_vec(),
      free_to_play_min_wvw_rank: 0,
      free_to_play_min_level:    80,
    }
  }
}

/// The platform identity a key is being linked for.
#[derive(Debug, Clone, Copy)]
pub struct KeyOwner<'a> {
  pub perspective:      Option<WorldId>,
  pub platform_id:      PlatformId,
  pub platform_user_id: &'a str,
}

impl RestrictionPolicy {
  /// The key must be named after its owner and carry every required
  /// permission.
  pub fn check_api_key(
    &self,
    token: &RemoteTokenInfo,
    owner: KeyOwner<'_>,
  ) -> Result<(), Restriction> {
    let code = api_key_code(owner.platform_user_id);
    if !token.name.to_ascii_uppercase().contains(&code) {
      let expected =
        api_key_name(owner.perspective, owner.platform_id, owner.platform_user_id);
      return Err(Restriction::new(format!(
        "api key name must contain \"{expected}\", found \"{}\"",
        token.name
      )));
    }

    let missing: Vec<&str> = self
      .required_permissions
      .iter()
      .filter(|p| !token.permissions.contains(p))
      .map(String::as_str)
      .collect();
    if !missing.is_empty() {
      return Err(Restriction::new(format!(
        "api key is missing required permissions: {}",
        missing.join(", ")
      )));
    }
    Ok(())
  }

  /// Whether the character roster must be fetched to finish checking this
  /// account.
  pub fn needs_character_check(&self, account: &RemoteAccount) -> bool {
    is_free_to_play(&account.access)
  }

  pub fn check_account(&self, account: &RemoteAccount) -> Result<(), Restriction> {
    if !is_free_to_play(&account.access) {
      return Ok(());
    }
    let rank = account.effective_wvw_rank();
    if rank < self.free_to_play_min_wvw_rank {
      return Err(Restriction::new(format!(
        "free to play accounts need WvW rank {} to verify; current rank: {rank}",
        self.free_to_play_min_wvw_rank
      )));
    }
    Ok(())
  }

  /// `highest_level` is the maximum level across the account's characters.
  pub fn check_characters(
    &self,
    account: &RemoteAccount,
    highest_level: i32,
  ) -> Result<(), Restriction> {
    if !is_free_to_play(&account.access) {
      return Ok(());
    }
    if highest_level < self.free_to_play_min_level {
      return Err(Restriction::new(format!(
        "free to play accounts need a level {} character to verify; highest \
         level found: {highest_level}",
        self.free_to_play_min_level
      )));
    }
    Ok(())
  }
}

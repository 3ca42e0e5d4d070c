//! The access decision produced by the status resolver.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The outcome of evaluating a user from the point of view of one world.
///
/// Variants are declared in ascending precedence: the derived [`Ord`] *is*
/// the precedence order, so "keep the highest-priority candidate" is simply
/// `max()`.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumIter,
  EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
  /// Fallback: the world-link cache is not synchronised, or nothing else
  /// applies.
  #[default]
  DeniedUnknown,
  /// An account fails a policy restriction.
  DeniedRequirementNotMet,
  /// Accounts exist but match neither the home world nor a linked world.
  DeniedInvalidWorld,
  /// Account data is older than the freshness window and no credential has
  /// refreshed it since.
  DeniedExpired,
  /// No owned accounts and no unexpired temporary grants.
  DeniedAccountNotLinked,
  GrantedLinkedWorldTemporary,
  GrantedHomeWorldTemporary,
  GrantedLinkedWorld,
  GrantedHomeWorld,
  /// An active ban exists. Always wins.
  DeniedBanned,
}

impl Status {
  pub fn is_granted(self) -> bool {
    matches!(
      self,
      Self::GrantedHomeWorld
        | Self::GrantedLinkedWorld
        | Self::GrantedHomeWorldTemporary
        | Self::GrantedLinkedWorldTemporary
    )
  }

  pub fn is_denied(self) -> bool { !self.is_granted() }
}

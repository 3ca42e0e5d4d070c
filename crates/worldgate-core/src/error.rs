//! Error types for `worldgate-core`.

use thiserror::Error;

use crate::world::WorldId;

#[derive(Debug, Error)]
pub enum Error {
  /// The world-link cache has not completed its first successful refresh.
  ///
  /// Distinct from "no links": an empty link set is a valid answer, this is
  /// not.
  #[error("world links are not synchronized yet")]
  WorldLinksNotSynced,

  #[error("unknown world: {0}")]
  UnknownWorld(WorldId),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Handlers for `/v1/worlds` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/v1/worlds/links` | 503 until the first matchup refresh |
//! | `GET`  | `/v1/worlds/:world/links` | 404 for unknown worlds |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use worldgate_core::{
  fetch::AccountFetcher,
  store::VerifyStore,
  world::{WorldId, WorldLinkMap},
};
use worldgate_verify::Services;

use crate::error::ApiError;

/// `GET /v1/worlds/links`
pub async fn all<S, F>(
  State(services): State<Arc<Services<S, F>>>,
) -> Result<Json<WorldLinkMap>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let map = services
    .worlds
    .all()
    .map_err(worldgate_verify::Error::from)?;
  Ok(Json(WorldLinkMap::clone(&map)))
}

/// `GET /v1/worlds/:world/links`
pub async fn links<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path(world): Path<WorldId>,
) -> Result<Json<Vec<WorldId>>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let links = services
    .worlds
    .links(world)
    .map_err(worldgate_verify::Error::from)?;
  Ok(Json(links))
}

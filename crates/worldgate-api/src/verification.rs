//! Handlers for `/v1/verification/platform/:platform_id/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/:platform_user_id?world=` | Status seen from `world` |
//! | `GET`  | `/updates?world=&subscriber=` | Long-poll for status changes |
//! | `PUT`  | `/:platform_user_id/temporary?world=` | Body: `{"world"?, "access_type"?, "until"?}` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use worldgate_core::{
  Status,
  fetch::AccountFetcher,
  model::{Ban, PlatformId, VerificationUpdate},
  store::VerifyStore,
  world::WorldId,
};
use worldgate_verify::{GrantRequest, Services};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct WorldParams {
  pub world: WorldId,
}

// ─── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
  pub status: Status,
  pub ban:    Option<Ban>,
}

/// `GET /v1/verification/platform/:platform_id/users/:platform_user_id?world=<id>`
pub async fn status<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path((platform_id, platform_user_id)): Path<(PlatformId, String)>,
  Query(params): Query<WorldParams>,
) -> Result<Json<StatusResponse>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let (status, ban) = services
    .verification_status(params.world, platform_id, &platform_user_id)
    .await?;
  Ok(Json(StatusResponse { status, ban }))
}

// ─── Updates ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdatesParams {
  pub world:      WorldId,
  pub subscriber: String,
}

/// `GET /v1/verification/platform/:platform_id/users/updates?world=&subscriber=`
pub async fn updates<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path(platform_id): Path<PlatformId>,
  Query(params): Query<UpdatesParams>,
) -> Result<Json<VerificationUpdate>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let mut subscription = services.emitter.subscribe_statuses(
    &params.subscriber,
    Some(platform_id),
    params.world,
  )?;

  let received = subscription
    .recv_timeout(services.config.listener_timeout())
    .await;
  match received {
    Some(update) => Ok(Json(update)),
    None => {
      subscription.close();
      Err(ApiError::PollTimeout)
    }
  }
}

// ─── Temporary access ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct TemporaryResponse {
  pub until: DateTime<Utc>,
}

/// `PUT /v1/verification/platform/:platform_id/users/:platform_user_id/temporary?world=<id>`
pub async fn temporary<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path((platform_id, platform_user_id)): Path<(PlatformId, String)>,
  Query(params): Query<WorldParams>,
  Json(body): Json<GrantRequest>,
) -> Result<Json<TemporaryResponse>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let until = services
    .ephemeral
    .grant(params.world, platform_id, &platform_user_id, body)
    .await?;
  Ok(Json(TemporaryResponse { until }))
}

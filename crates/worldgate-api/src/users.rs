//! Handlers for `/v1/platform/:platform_id/users` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/updates?subscriber=` | Long-poll for raw user changes |
//! | `GET`  | `/:platform_user_id` | 404 if unknown |
//! | `PUT`  | `/:platform_user_id/apikey?world=&skip_requirements=` | Body: `{"apikey":"..","primary":true}` |
//! | `GET`  | `/:platform_user_id/apikey/name?world=` | Expected key name |
//! | `PUT`  | `/:platform_user_id/ban` | Body: `{"until":"..","reason":".."}` |
//! | `POST` | `/:platform_user_id/refresh` | Re-sync and return the user |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use worldgate_core::{
  fetch::AccountFetcher,
  keyname,
  model::{PlatformId, UserView},
  store::VerifyStore,
  world::WorldId,
};
use worldgate_verify::{LinkRequest, Services};

use crate::error::ApiError;

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /v1/platform/:platform_id/users/:platform_user_id`
pub async fn get_one<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path((platform_id, platform_user_id)): Path<(PlatformId, String)>,
) -> Result<Json<UserView>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let view = services
    .platform_user(platform_id, &platform_user_id)
    .await?
    .ok_or_else(|| {
      ApiError::NotFound(format!("platform user {platform_id}/{platform_user_id} not found"))
    })?;
  Ok(Json(view))
}

// ─── Updates ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdatesParams {
  pub subscriber: String,
}

/// `GET /v1/platform/:platform_id/users/updates?subscriber=<id>`
///
/// Blocks until a user linked on the platform changes, or answers 408 once
/// the listener timeout elapses.
pub async fn updates<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path(platform_id): Path<PlatformId>,
  Query(params): Query<UpdatesParams>,
) -> Result<Json<UserView>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let mut subscription = services
    .emitter
    .subscribe_users(&params.subscriber, Some(platform_id))?;

  let received = subscription
    .recv_timeout(services.config.listener_timeout())
    .await;
  match received {
    Some(view) => Ok(Json(Arc::unwrap_or_clone(view))),
    None => {
      subscription.close();
      Err(ApiError::PollTimeout)
    }
  }
}

// ─── API key ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ApiKeyParams {
  pub world:             Option<WorldId>,
  #[serde(default)]
  pub skip_requirements: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiKeyBody {
  pub apikey:  String,
  #[serde(default)]
  pub primary: bool,
}

/// `PUT /v1/platform/:platform_id/users/:platform_user_id/apikey`
pub async fn put_api_key<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path((platform_id, platform_user_id)): Path<(PlatformId, String)>,
  Query(params): Query<ApiKeyParams>,
  Json(body): Json<ApiKeyBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let view = services
    .linker
    .link_api_key(LinkRequest {
      perspective: params.world,
      platform_id,
      platform_user_id,
      primary: body.primary,
      api_key: body.apikey,
      skip_requirements: params.skip_requirements,
    })
    .await?;
  Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
pub struct KeyNameParams {
  pub world: Option<WorldId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyName {
  pub name: String,
}

/// `GET /v1/platform/:platform_id/users/:platform_user_id/apikey/name`
pub async fn api_key_name(
  Path((platform_id, platform_user_id)): Path<(PlatformId, String)>,
  Query(params): Query<KeyNameParams>,
) -> Json<KeyName> {
  Json(KeyName {
    name: keyname::api_key_name(params.world, platform_id, &platform_user_id),
  })
}

// ─── Ban ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BanBody {
  pub until:  DateTime<Utc>,
  pub reason: String,
}

/// `PUT /v1/platform/:platform_id/users/:platform_user_id/ban`
pub async fn ban<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path((platform_id, platform_user_id)): Path<(PlatformId, String)>,
  Json(body): Json<BanBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let ban = services
    .bans
    .ban_platform_user(platform_id, &platform_user_id, body.reason, body.until)
    .await?;
  Ok((StatusCode::CREATED, Json(ban)))
}

// ─── Refresh ──────────────────────────────────────────────────────────────────

/// `POST /v1/platform/:platform_id/users/:platform_user_id/refresh`
pub async fn refresh<S, F>(
  State(services): State<Arc<Services<S, F>>>,
  Path((platform_id, platform_user_id)): Path<(PlatformId, String)>,
) -> Result<Json<UserView>, ApiError>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  let view = services
    .refresh_platform_user(platform_id, &platform_user_id)
    .await?;
  Ok(Json(view))
}

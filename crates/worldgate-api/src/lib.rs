//! JSON REST API for the verification service.
//!
//! Exposes an axum [`Router`] over a [`Services`] bundle. Handlers only
//! parse parameters, call one service operation and shape the JSON.
//! Authentication and TLS are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = worldgate_api::api_router(services.clone());
//! ```

pub mod error;
pub mod users;
pub mod verification;
pub mod worlds;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post, put},
};
use worldgate_core::{fetch::AccountFetcher, store::VerifyStore};
use worldgate_verify::Services;

pub use error::ApiError;

/// Build the `/v1` router for `services`.
pub fn api_router<S, F>(services: Arc<Services<S, F>>) -> Router<()>
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  Router::new()
    // Worlds
    .route("/v1/worlds/links", get(worlds::all::<S, F>))
    .route("/v1/worlds/{world}/links", get(worlds::links::<S, F>))
    // Platform users
    .route("/v1/platform/{platform_id}/users/updates", get(users::updates::<S, F>))
    .route("/v1/platform/{platform_id}/users/{platform_user_id}", get(users::get_one::<S, F>))
    .route(
      "/v1/platform/{platform_id}/users/{platform_user_id}/apikey",
      put(users::put_api_key::<S, F>),
    )
    .route(
      "/v1/platform/{platform_id}/users/{platform_user_id}/apikey/name",
      get(users::api_key_name),
    )
    .route("/v1/platform/{platform_id}/users/{platform_user_id}/ban", put(users::ban::<S, F>))
    .route(
      "/v1/platform/{platform_id}/users/{platform_user_id}/refresh",
      post(users::refresh::<S, F>),
    )
    // Verification
    .route(
      "/v1/verification/platform/{platform_id}/users/updates",
      get(verification::updates::<S, F>),
    )
    .route(
      "/v1/verification/platform/{platform_id}/users/{platform_user_id}",
      get(verification::status::<S, F>),
    )
    .route(
      "/v1/verification/platform/{platform_id}/users/{platform_user_id}/temporary",
      put(verification::temporary::<S, F>),
    )
    .with_state(services)
}

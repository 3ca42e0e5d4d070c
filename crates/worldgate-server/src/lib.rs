//! Server assembly for the verification service.
//!
//! Holds the configuration shape read from `config.toml` and wraps the API
//! router with request tracing. The binary in `main.rs` does the wiring.

use std::{path::PathBuf, sync::Arc};

use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use worldgate_core::{fetch::AccountFetcher, store::VerifyStore};
use worldgate_verify::{Services, VerifyConfig};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `WORLDGATE__*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:        String,
  pub port:        u16,
  pub store_path:  PathBuf,
  /// Base URL of the game API.
  pub gw2_api_url: String,
  pub verify:      VerifyConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:        "127.0.0.1".into(),
      port:        8080,
      store_path:  PathBuf::from("worldgate.db"),
      gw2_api_url: worldgate_gw2api::DEFAULT_BASE_URL.into(),
      verify:      VerifyConfig::default(),
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the HTTP application for `services`.
pub fn app<S, F>(services: Arc<Services<S, F>>) -> Router
where
  S: VerifyStore + 'static,
  F: AccountFetcher + 'static,
{
  worldgate_api::api_router(services).layer(TraceLayer::new_for_http())
}

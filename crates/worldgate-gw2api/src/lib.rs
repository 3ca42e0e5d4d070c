//! HTTP client for the public game API (`/v2`), implementing
//! [`AccountFetcher`].
//!
//! Every call makes exactly one request. Retrying is the caller's business:
//! the synchroniser simply tries again on a later tick.

use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;
use worldgate_core::fetch::{
  AccountFetcher, FetchError, Matchup, RemoteAccount, RemoteAchievement,
  RemoteCharacter, RemoteTokenInfo, RemoteWvw,
};

pub const DEFAULT_BASE_URL: &str = "https://api.guildwars2.com";

/// Response schema pinned so that `/v2/account` carries the `wvw` object.
const SCHEMA_VERSION: &str = "2024-07-20T01:00:00.000Z";

/// Async client for the game API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct Gw2Client {
  http:     Client,
  base_url: Url,
}

impl Gw2Client {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
    let http = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| FetchError::Transport(format!("failed to build HTTP client: {e}")))?;
    let base_url = Url::parse(base_url)
      .map_err(|e| FetchError::Transport(format!("invalid base url {base_url:?}: {e}")))?;
    Ok(Self { http, base_url })
  }

  fn url(&self, segments: &[&str]) -> Result<Url, FetchError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|()| FetchError::Transport(format!("base url {} cannot take a path", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn get<T: DeserializeOwned>(
    &self,
    segments: &[&str],
    query: &[(&str, String)],
    api_key: Option<&str>,
  ) -> Result<T, FetchError> {
    let url = self.url(segments)?;
    debug!(path = url.path(), "game api request");

    let mut req = self
      .http
      .get(url)
      .query(query)
      .header("X-Schema-Version", SCHEMA_VERSION);
    if let Some(key) = api_key {
      req = req.bearer_auth(key);
    }

    let resp = req
      .send()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(classify(status, &body));
    }

    let body = resp
      .bytes()
      .await
      .map_err(|e| FetchError::Transport(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))
  }
}

/// Map a non-success response to a [`FetchError`].
///
/// The API reports a rejected key either as 401 or as 400 with an
/// `{"text": "invalid key"}` body.
pub fn classify(status: StatusCode, body: &str) -> FetchError {
  let text = serde_json::from_str::<serde_json::Value>(body)
    .ok()
    .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(str::to_owned))
    .unwrap_or_else(|| body.trim().to_owned());
  let lower = text.to_ascii_lowercase();

  match status {
    StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
    StatusCode::UNAUTHORIZED => FetchError::InvalidKey,
    StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN
      if lower.contains("invalid key") || lower.contains("invalid access token") =>
    {
      FetchError::InvalidKey
    }
    other => FetchError::Status(other.as_u16(), text),
  }
}

impl AccountFetcher for Gw2Client {
  async fn token_info(&self, api_key: &str) -> Result<RemoteTokenInfo, FetchError> {
    self.get(&["v2", "tokeninfo"], &[], Some(api_key)).await
  }

  async fn account(&self, api_key: &str) -> Result<RemoteAccount, FetchError> {
    self.get(&["v2", "account"], &[], Some(api_key)).await
  }

  async fn account_wvw(&self, api_key: &str) -> Result<RemoteWvw, FetchError> {
    self.get(&["v2", "account", "wvw"], &[], Some(api_key)).await
  }

  async fn account_achievements(
    &self,
    api_key: &str,
    ids: &[i32],
  ) -> Result<Vec<RemoteAchievement>, FetchError> {
    let ids = ids.iter().map(i32::to_string).collect::<Vec<_>>().join(",");
    match self
      .get(&["v2", "account", "achievements"], &[("ids", ids)], Some(api_key))
      .await
    {
      // No progress on any of the requested ids.
      Err(FetchError::Status(404, _)) => Ok(Vec::new()),
      other => other,
    }
  }

  async fn characters(&self, api_key: &str) -> Result<Vec<String>, FetchError> {
    self.get(&["v2", "characters"], &[], Some(api_key)).await
  }

  async fn character_core(
    &self,
    api_key: &str,
    name: &str,
  ) -> Result<RemoteCharacter, FetchError> {
    self
      .get(&["v2", "characters", name, "core"], &[], Some(api_key))
      .await
  }

  async fn wvw_matches(&self) -> Result<Vec<Matchup>, FetchError> {
    self
      .get(&["v2", "wvw", "matches"], &[("ids", "all".to_owned())], None)
      .await
  }
}

#[cfg(test)]
mod tests {
  use axum::{
    Json, Router,
    http::{HeaderMap, StatusCode as AxumStatus},
    routing::get,
  };
  use serde_json::json;

  use super::*;

  #[test]
  fn classify_errors() {
    assert_eq!(
      classify(StatusCode::BAD_REQUEST, r#"{"text":"Invalid key"}"#),
      FetchError::InvalidKey
    );
    assert_eq!(classify(StatusCode::UNAUTHORIZED, ""), FetchError::InvalidKey);
    assert_eq!(
      classify(StatusCode::TOO_MANY_REQUESTS, r#"{"text":"too many requests"}"#),
      FetchError::RateLimited
    );
    assert_eq!(
      classify(StatusCode::BAD_GATEWAY, "upstream down"),
      FetchError::Status(502, "upstream down".into())
    );
  }

  #[test]
  fn url_encodes_character_names() {
    let client = Gw2Client::new("http://localhost:1/", Duration::from_secs(1)).unwrap();
    let url = client.url(&["v2", "characters", "Zojja Of Rata", "core"]).unwrap();
    assert_eq!(url.path(), "/v2/characters/Zojja%20Of%20Rata/core");
  }

  async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
  }

  #[tokio::test]
  async fn authenticated_requests_carry_bearer_token() {
    let app = Router::new()
      .route(
        "/v2/tokeninfo",
        get(|headers: HeaderMap| async move {
          let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
          if auth != "Bearer GOOD-KEY" {
            return Err((AxumStatus::BAD_REQUEST, Json(json!({ "text": "invalid key" }))));
          }
          Ok(Json(json!({
            "id": "GOOD-KEY-ID",
            "name": "JadeSea1-ABCDEF",
            "permissions": ["account", "wvw"]
          })))
        }),
      )
      .route(
        "/v2/wvw/matches",
        get(|| async {
          Json(json!([{
            "id": "2-1",
            "end_time": "2024-06-07T18:00:00Z",
            "all_worlds": { "red": [2101, 2102], "blue": [2201], "green": [2301] }
          }]))
        }),
      );
    let base = serve(app).await;
    let client = Gw2Client::new(&base, Duration::from_secs(5)).unwrap();

    let info = client.token_info("GOOD-KEY").await.unwrap();
    assert_eq!(info.id, "GOOD-KEY-ID");
    assert_eq!(info.permissions, vec!["account", "wvw"]);

    let err = client.token_info("BAD-KEY").await.unwrap_err();
    assert!(err.is_invalid_key());

    let matches = client.wvw_matches().await.unwrap();
    assert_eq!(matches[0].worlds.red, vec![2101, 2102]);
  }

  #[tokio::test]
  async fn missing_achievement_progress_is_empty() {
    let app = Router::new().route(
      "/v2/account/achievements",
      get(|| async {
        (AxumStatus::NOT_FOUND, Json(json!({ "text": "all ids provided are invalid" })))
      }),
    );
    let base = serve(app).await;
    let client = Gw2Client::new(&base, Duration::from_secs(5)).unwrap();
    let progress = client.account_achievements("KEY", &[283, 306]).await.unwrap();
    assert!(progress.is_empty());
  }
}

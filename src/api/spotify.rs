use super::paging::collect_paged;
use super::{PlaylistApi, TokenAccessor, MAX_TRACKS_PER_REQUEST};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    ApiErrorEnvelope, FullTrack, Page, PlaylistTrackItem, SimplifiedPlaylist, SnapshotResponse, User,
};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

/// Rate-limit retries allowed per request before giving up.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 5;
const BACKOFF_BASE_MS: u64 = 250;
const BACKOFF_CAP_MS: u64 = 5000;

const PLAYLISTS_PAGE_SIZE: usize = 50;
const TRACKS_PAGE_SIZE: usize = 100;

/// How long to wait before retrying a 429.
///
/// A `Retry-After` header holding whole, non-negative seconds wins; anything
/// else falls back to `min(250ms * 2^attempt, 5s)`.
pub fn retry_after_duration(header: Option<&str>, attempt: u32) -> Duration {
    if let Some(secs) = header.and_then(|h| h.trim().parse::<i64>().ok()) {
        if secs >= 0 {
            return Duration::from_secs(secs as u64);
        }
    }
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_CAP_MS))
}

/// Turn a non-2xx body into a typed error.
fn decode_api_error(body: &str, status: u16) -> Error {
    match serde_json::from_str::<ApiErrorEnvelope>(body) {
        Ok(env) => Error::Api {
            status: if env.error.status == 0 { status } else { env.error.status },
            message: env.error.message,
        },
        Err(_) => Error::Http { status },
    }
}

/// Spotify Web API client.
///
/// Every request obtains its bearer token from the injected `TokenAccessor`.
/// A 401 triggers exactly one forced refresh per request; a 429 is retried
/// with `Retry-After` or exponential backoff up to `MAX_RATE_LIMIT_RETRIES`
/// times. Transport errors are returned immediately.
pub struct SpotifyClient {
    client: Client,
    base_url: String,
    user_agent: Option<String>,
    tokens: Arc<dyn TokenAccessor>,
}

impl SpotifyClient {
    pub fn new(tokens: Arc<dyn TokenAccessor>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_API_BASE.into(),
            user_agent: None,
            tokens,
        }
    }

    pub fn from_config(cfg: &Config, tokens: Arc<dyn TokenAccessor>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        Ok(Self::new(tokens)
            .with_http_client(client)
            .with_base_url(&cfg.api_base_url)?
            .with_user_agent(cfg.user_agent.clone()))
    }

    pub fn with_base_url(mut self, base: &str) -> Result<Self> {
        // validate early so a bad base fails at construction, not per request
        Url::parse(base)?;
        self.base_url = base.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        let ua = ua.into();
        self.user_agent = if ua.is_empty() { None } else { Some(ua) };
        self
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    /// Issue an authenticated JSON request.
    ///
    /// Returns `None` for a 2xx with an empty body, otherwise the parsed JSON.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let url = self.url(path, query)?;
        let body_bytes = body.map(serde_json::to_vec).transpose()?;

        let mut refreshed = false;
        let mut rate_retries: u32 = 0;
        loop {
            let bearer = self.tokens.access_token().await?;
            let mut req = self
                .client
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, format!("Bearer {}", bearer))
                .header(ACCEPT, "application/json");
            if let Some(ua) = &self.user_agent {
                req = req.header(USER_AGENT, ua);
            }
            if let Some(b) = &body_bytes {
                req = req.header(CONTENT_TYPE, "application/json").body(b.clone());
            }

            debug!("{} {}", method, url.path());
            let resp = req.send().await?;
            let status = resp.status();

            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(Error::Auth(format!(
                        "{} {} still unauthorized after token refresh",
                        method,
                        url.path()
                    )));
                }
                warn!("Got 401 for {} {}; forcing token refresh", method, url.path());
                self.tokens.force_refresh(&bearer).await?;
                refreshed = true;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if rate_retries >= MAX_RATE_LIMIT_RETRIES {
                    return Err(Error::RateLimitExceeded { retries: rate_retries });
                }
                let header = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let wait = retry_after_duration(header.as_deref(), rate_retries);
                rate_retries += 1;
                warn!(
                    "Rate limited on {} {}; retry {}/{} in {:?}",
                    method,
                    url.path(),
                    rate_retries,
                    MAX_RATE_LIMIT_RETRIES,
                    wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let text = resp.text().await?;
            if !status.is_success() {
                return Err(decode_api_error(&text, status.as_u16()));
            }
            if text.trim().is_empty() {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_str(&text)?));
        }
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T> {
        let v = self.request(method, path, query, body).await?.unwrap_or(Value::Null);
        Ok(serde_json::from_value(v)?)
    }

    async fn fetch_page<T: DeserializeOwned>(&self, path: &str, limit: usize, offset: usize) -> Result<Page<T>> {
        let query = [("limit", limit.to_string()), ("offset", offset.to_string())];
        self.request_json(Method::GET, path, &query, None).await
    }
}

fn required_id(playlist_id: &str) -> Result<&str> {
    let id = playlist_id.trim();
    if id.is_empty() {
        return Err(Error::Validation("playlist id is required".into()));
    }
    Ok(id)
}

fn playlist_path(playlist_id: &str, suffix: &str) -> String {
    format!("/playlists/{}{}", urlencoding::encode(playlist_id), suffix)
}

fn clean_uris(uris: &[String]) -> Result<Vec<String>> {
    let clean: Vec<String> = uris
        .iter()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .map(String::from)
        .collect();
    if clean.is_empty() {
        return Err(Error::Validation("at least one track uri is required".into()));
    }
    Ok(clean)
}

#[async_trait]
impl PlaylistApi for SpotifyClient {
    async fn get_me(&self) -> Result<User> {
        self.request_json(Method::GET, "/me", &[], None).await
    }

    async fn list_current_user_playlists(&self, max: usize) -> Result<Vec<SimplifiedPlaylist>> {
        collect_paged(PLAYLISTS_PAGE_SIZE, max, |limit, offset| {
            self.fetch_page::<SimplifiedPlaylist>("/me/playlists", limit, offset)
        })
        .await
    }

    async fn list_playlist_tracks(&self, playlist_id: &str, max: usize) -> Result<Vec<FullTrack>> {
        let path = playlist_path(required_id(playlist_id)?, "/tracks");
        let items = collect_paged(TRACKS_PAGE_SIZE, max, |limit, offset| {
            self.fetch_page::<PlaylistTrackItem>(&path, limit, offset)
        })
        .await?;
        Ok(items
            .into_iter()
            .filter_map(|it| it.track)
            .filter(|t| !t.uri.is_empty())
            .collect())
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist> {
        let path = playlist_path(required_id(playlist_id)?, "");
        self.request_json(Method::GET, &path, &[], None).await
    }

    async fn create_playlist(&self, name: &str, description: &str, public: bool) -> Result<SimplifiedPlaylist> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name is required".into()));
        }
        let body = json!({
            "name": name,
            "public": public,
            "description": description,
        });
        self.request_json(Method::POST, "/me/playlists", &[], Some(&body)).await
    }

    async fn add_tracks_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        let path = playlist_path(required_id(playlist_id)?, "/tracks");
        let clean = clean_uris(uris)?;
        let mut last_snapshot = String::new();
        for batch in clean.chunks(MAX_TRACKS_PER_REQUEST) {
            let body = json!({ "uris": batch });
            let resp: SnapshotResponse = self.request_json(Method::POST, &path, &[], Some(&body)).await?;
            last_snapshot = resp.snapshot_id;
        }
        Ok(last_snapshot)
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        // Playlists cannot be hard-deleted; unfollowing removes them from the library.
        let path = playlist_path(required_id(playlist_id)?, "/followers");
        self.request(Method::DELETE, &path, &[], None).await?;
        Ok(())
    }

    async fn remove_tracks_from_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        let path = playlist_path(required_id(playlist_id)?, "/tracks");
        let tracks: Vec<Value> = clean_uris(uris)?
            .into_iter()
            .map(|u| json!({ "uri": u }))
            .collect();
        let body = json!({ "tracks": tracks });
        let resp: SnapshotResponse = self.request_json(Method::DELETE, &path, &[], Some(&body)).await?;
        Ok(resp.snapshot_id)
    }
}

use super::TokenAccessor;
use crate::db;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

const PROVIDER: &str = "spotify";

/// OAuth token as persisted by the token store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl Token {
    /// A token within `leeway` of expiry (or without an access token) counts as expired.
    pub fn is_expired(&self, leeway: Duration) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        self.expires_at - Utc::now() <= leeway
    }

    fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|r| !r.is_empty())
    }
}

/// Successful response of the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    scope: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    refresh_token: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Exchanges a refresh token for a new token.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Token>;
}

/// Refresh against the accounts service token endpoint (public PKCE client).
pub struct OAuthRefresher {
    client: Client,
    auth_base: String,
    client_id: String,
}

impl OAuthRefresher {
    pub fn new(auth_base: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            auth_base: auth_base.into(),
            client_id: client_id.into(),
        }
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn token_url(&self) -> String {
        format!("{}/api/token", self.auth_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Refresher for OAuthRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        if refresh_token.is_empty() {
            return Err(Error::Auth("missing refresh token".into()));
        }
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let resp = self.client.post(self.token_url()).form(&params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            if let Ok(te) = serde_json::from_str::<TokenErrorResponse>(&body) {
                let msg = match te.error_description {
                    Some(d) if !d.is_empty() => format!("token refresh failed: {} ({})", te.error, d),
                    _ => format!("token refresh failed: {}", te.error),
                };
                return Err(Error::Auth(msg));
            }
            return Err(Error::Auth(format!("token refresh failed: http {}", status.as_u16())));
        }

        let tr: TokenResponse = serde_json::from_str(&body)?;
        if tr.access_token.is_empty() {
            return Err(Error::Auth("missing access_token in refresh response".into()));
        }
        // No new refresh token in the response means the old one stays valid.
        let refresh_token = tr
            .refresh_token
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| refresh_token.to_string());
        let expires_at = Duration::try_seconds(tr.expires_in)
            .and_then(|d| Utc::now().checked_add_signed(d))
            .ok_or_else(|| Error::Auth(format!("invalid expires_in in refresh response: {}", tr.expires_in)))?;
        Ok(Token {
            access_token: tr.access_token,
            token_type: tr.token_type,
            scope: tr.scope,
            expires_at,
            refresh_token: Some(refresh_token),
        })
    }
}

/// Where tokens live between runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Token>>;
    async fn save(&self, token: &Token) -> Result<()>;
}

/// Token persisted as JSON in the SQLite credentials table.
pub struct SqliteTokenStore {
    db_path: PathBuf,
    client_id: Option<String>,
}

impl SqliteTokenStore {
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, client_id: None }
    }

    /// Record the client id the token was issued to alongside it.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        let id = client_id.into();
        self.client_id = if id.trim().is_empty() { None } else { Some(id) };
        self
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        let db_path = self.db_path.clone();
        let json_opt = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let conn = db::open_or_create(&db_path)?;
            Ok(db::load_credential_with_client(&conn, PROVIDER)?.map(|(json, _)| json))
        })
        .await??;

        match json_opt {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, token: &Token) -> Result<()> {
        let db_path = self.db_path.clone();
        let client_id = self.client_id.clone();
        let s = serde_json::to_string(token)?;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = db::open_or_create(&db_path)?;
            db::save_credential_raw(&conn, PROVIDER, &s, client_id.as_deref())
        })
        .await??;
        Ok(())
    }
}

/// In-process token store; useful for tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    token: tokio::sync::Mutex<Option<Token>>,
}

impl MemoryTokenStore {
    pub fn new(token: Option<Token>) -> Self {
        Self {
            token: tokio::sync::Mutex::new(token),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Token>> {
        Ok(self.token.lock().await.clone())
    }

    async fn save(&self, token: &Token) -> Result<()> {
        *self.token.lock().await = Some(token.clone());
        Ok(())
    }
}

/// `TokenAccessor` over a store and a refresher.
///
/// One async mutex is held across load, refresh and save, so concurrent
/// callers never refresh in parallel: whoever waited re-reads the store and
/// picks up the token the first caller just saved. This holds for forced
/// refreshes too; a caller whose rejected token was already replaced gets
/// the replacement without another refresh.
pub struct TokenManager {
    store: Box<dyn TokenStore>,
    refresher: Box<dyn Refresher>,
    leeway: Duration,
    lock: tokio::sync::Mutex<()>,
}

impl TokenManager {
    pub fn new(store: Box<dyn TokenStore>, refresher: Box<dyn Refresher>, leeway: Duration) -> Self {
        Self {
            store,
            refresher,
            leeway,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn load_required(&self) -> Result<Token> {
        match self.store.load().await? {
            Some(t) if !t.access_token.is_empty() => Ok(t),
            _ => Err(Error::Auth("not logged in (missing token)".into())),
        }
    }

    async fn refresh_and_save(&self, refresh_token: &str) -> Result<String> {
        let nt = self.refresher.refresh(refresh_token).await?;
        self.store.save(&nt).await?;
        info!("Spotify access token refreshed");
        Ok(nt.access_token)
    }
}

#[async_trait]
impl TokenAccessor for TokenManager {
    async fn access_token(&self) -> Result<String> {
        let _guard = self.lock.lock().await;
        let t = self.load_required().await?;
        if !t.is_expired(self.leeway) {
            return Ok(t.access_token);
        }
        debug!("Spotify token is near expiry, refreshing");
        let refresh = t.usable_refresh_token().ok_or_else(|| {
            Error::Auth("access token expired and no refresh token present".into())
        })?;
        self.refresh_and_save(refresh).await
    }

    async fn force_refresh(&self, rejected: &str) -> Result<String> {
        let _guard = self.lock.lock().await;
        let t = self.load_required().await?;
        if t.access_token != rejected && !t.is_expired(self.leeway) {
            debug!("Spotify token already replaced since it was rejected");
            return Ok(t.access_token);
        }
        let refresh = t
            .usable_refresh_token()
            .ok_or_else(|| Error::Auth("missing refresh token".into()))?;
        self.refresh_and_save(refresh).await
    }
}

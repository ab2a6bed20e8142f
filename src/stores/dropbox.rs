//! Dropbox store: media are uploaded through the HTTP API using the bucketing
//! layout, with an OAuth2 code flow driven from chat.

use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::bucket::{save_bucketed, ListPage, RemoteFs};
use super::media::HttpMediaSource;
use crate::config::DropboxConfig;
use crate::model::Post;
use crate::plugin::{Plugin, Store};

const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const TOKEN_URL: &str = "https://api.dropboxapi.com/oauth2/token";
const RPC_URL: &str = "https://api.dropboxapi.com/2";
const UPLOAD_URL: &str = "https://content.dropboxapi.com/2/files/upload";
const SCOPES: &str = "files.content.write files.content.read";

/// Tokens are refreshed this long before they actually expire
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, rename = "expiry", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at - TimeDelta::seconds(EXPIRY_MARGIN_SECS) <= now)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_token(self, previous_refresh: Option<String>) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + TimeDelta::seconds(secs)),
        }
    }
}

struct TokenState {
    token: Token,
    /// Static tokens from the config file are not written back to chat
    persist: bool,
}

pub struct DropboxStore {
    config: DropboxConfig,
    http: reqwest::Client,
    token_url: String,
    token: RwLock<Option<TokenState>>,
    media: HttpMediaSource,
}

impl DropboxStore {
    pub fn new(config: DropboxConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            media: HttpMediaSource::new(http.clone()),
            http,
            token_url: TOKEN_URL.to_string(),
            token: RwLock::new(None),
        }
    }

    fn current(&self) -> Option<(Token, bool)> {
        self.token
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| (s.token.clone(), s.persist)))
    }

    fn set_token(&self, token: Token, persist: bool) -> Result<()> {
        let mut guard = self
            .token
            .write()
            .map_err(|_| anyhow::anyhow!("dropbox token lock poisoned"))?;
        *guard = Some(TokenState { token, persist });
        Ok(())
    }

    /// A usable access token, refreshing it first when it is about to expire
    async fn access_token(&self) -> Result<String> {
        let (token, persist) = self.current().context("not logged in")?;
        if !token.is_expired(Utc::now()) {
            return Ok(token.access_token);
        }

        let refreshed = self.refresh(&token).await?;
        let access_token = refreshed.access_token.clone();
        self.set_token(refreshed, persist)?;
        Ok(access_token)
    }

    async fn refresh(&self, token: &Token) -> Result<Token> {
        let refresh_token = token
            .refresh_token
            .clone()
            .context("token expired and cannot be refreshed")?;

        info!("Refreshing Dropbox access token");
        let response: TokenResponse = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .context("Failed to refresh token")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse token response")?;

        Ok(response.into_token(Some(refresh_token)))
    }

    fn authorize_url(&self) -> Result<String> {
        if self.config.client_id.is_empty() {
            anyhow::bail!("dropbox.client_id is not configured");
        }

        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("response_type", "code"),
            ("token_access_type", "offline"),
            ("scope", SCOPES),
        ];
        if let Some(redirect) = &self.config.redirect_url {
            params.push(("redirect_uri", redirect.as_str()));
        }

        Ok(url::Url::parse_with_params(AUTHORIZE_URL, &params)?.to_string())
    }
}

#[async_trait]
impl Plugin for DropboxStore {
    fn name(&self) -> &str {
        "dropbox"
    }

    async fn init(&self, saved: &str) -> Result<()> {
        if !saved.is_empty() {
            let token: Token =
                serde_json::from_str(saved).context("Failed to parse saved Dropbox token")?;
            let expired = token.is_expired(Utc::now());

            // stays in place when the refresh below fails
            self.set_token(token.clone(), true)?;
            if expired {
                let refreshed = self.refresh(&token).await?;
                self.set_token(refreshed, true)?;
            }
            return Ok(());
        }

        if let Some(static_token) = self.config.token.as_ref().filter(|t| !t.is_empty()) {
            debug!("Using static Dropbox token from config");
            let token = Token {
                access_token: static_token.clone(),
                refresh_token: None,
                expires_at: None,
            };
            return self.set_token(token, false);
        }

        anyhow::bail!("no token")
    }

    async fn request_login(&self) -> Result<String> {
        self.authorize_url()
    }

    async fn login(&self, code: &str) -> Result<String> {
        if code.is_empty() {
            anyhow::bail!("no code given");
        }

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(redirect) = &self.config.redirect_url {
            form.push(("redirect_uri", redirect.as_str()));
        }

        let response: TokenResponse = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .context("Failed to exchange code")?
            .error_for_status()?
            .json()
            .await
            .context("Failed to parse token response")?;

        self.set_token(response.into_token(None), true)?;
        info!("Logged in to Dropbox");
        Ok(String::new())
    }

    fn config(&self) -> String {
        match self.current() {
            Some((token, true)) => serde_json::to_string(&token).unwrap_or_else(|e| {
                warn!("Failed to serialize Dropbox token: {}", e);
                String::new()
            }),
            _ => String::new(),
        }
    }
}

#[async_trait]
impl Store for DropboxStore {
    async fn save(&self, post: &Post) -> Result<()> {
        if post.media.is_empty() {
            debug!("Post {} has no media, skipping Dropbox", post.id);
            return Ok(());
        }

        let files = DropboxFiles {
            http: self.http.clone(),
            token: self.access_token().await?,
        };
        save_bucketed(&files, &self.media, &self.config.base_dir, post).await
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    /// Endpoint-specific failure, reported by Dropbox with status 409
    #[error("dropbox error: {0}")]
    Endpoint(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    fn is(&self, summary_prefix: &str) -> bool {
        matches!(self, ApiError::Endpoint(summary) if summary.starts_with(summary_prefix))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error_summary: String,
}

#[derive(Deserialize)]
struct ListFolderResult {
    entries: Vec<Entry>,
    cursor: String,
    has_more: bool,
}

#[derive(Deserialize)]
struct Entry {
    #[serde(rename = ".tag")]
    tag: String,
    #[serde(default)]
    path_display: Option<String>,
}

/// Files API bound to one access token
struct DropboxFiles {
    http: reqwest::Client,
    token: String,
}

impl DropboxFiles {
    async fn rpc(&self, endpoint: &str, args: Value) -> Result<Value, ApiError> {
        let response = self
            .http
            .post(format!("{}/{}", RPC_URL, endpoint))
            .bearer_auth(&self.token)
            .json(&args)
            .send()
            .await?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value, ApiError> {
    if response.status() == reqwest::StatusCode::CONFLICT {
        let body: ErrorBody = response.json().await?;
        return Err(ApiError::Endpoint(body.error_summary));
    }
    Ok(response.error_for_status()?.json().await?)
}

#[async_trait]
impl RemoteFs for DropboxFiles {
    async fn folder_exists(&self, path: &str) -> Result<bool> {
        match self.rpc("files/get_metadata", json!({ "path": path })).await {
            Ok(meta) => Ok(meta[".tag"] == "folder"),
            Err(e) if e.is("path/not_found") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_page(&self, path: &str, cursor: Option<&str>) -> Result<ListPage> {
        let result = match cursor {
            None => {
                self.rpc("files/list_folder", json!({ "path": path }))
                    .await
            }
            Some(cursor) => {
                self.rpc("files/list_folder/continue", json!({ "cursor": cursor }))
                    .await
            }
        };

        let value = match result {
            Ok(value) => value,
            Err(e) if e.is("path/not_found") => return Ok(ListPage::default()),
            Err(e) => return Err(e.into()),
        };

        let listing: ListFolderResult = serde_json::from_value(value)?;
        Ok(ListPage {
            paths: listing
                .entries
                .into_iter()
                .filter(|entry| entry.tag == "file")
                .filter_map(|entry| entry.path_display)
                .collect(),
            cursor: listing.has_more.then_some(listing.cursor),
        })
    }

    async fn create_folder(&self, path: &str) -> Result<()> {
        match self
            .rpc(
                "files/create_folder_v2",
                json!({ "path": path, "autorename": false }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is("path/conflict/folder") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn move_file(&self, from: &str, to: &str) -> Result<()> {
        self.rpc(
            "files/move_v2",
            json!({ "from_path": from, "to_path": to, "autorename": false }),
        )
        .await?;
        Ok(())
    }

    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let arg = header_safe_json(&json!({
            "path": path,
            "mode": "overwrite",
            "mute": true,
        }))?;

        let response = self
            .http
            .post(UPLOAD_URL)
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        read_response(response).await?;
        Ok(())
    }
}

/// JSON that can travel in an HTTP header: everything outside printable ASCII
/// is written as `\uXXXX`.
fn header_safe_json(value: &Value) -> Result<String> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len());
    let mut units = [0u16; 2];

    for c in json.chars() {
        if c.is_ascii() && c != '\x7f' {
            out.push(c);
        } else {
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }

    Ok(out)
}

//! OAuth token handling for the Ring API.
//!
//! Tokens are cached on disk so repeated runs never prompt for credentials.
//! A cached token is refreshed on startup; without a cache a password grant
//! is performed, sending the two-factor code when one was supplied. Every
//! newly issued token is written back to the cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::fs;
use uuid::Uuid;

use super::error::AuthError;

pub const OAUTH_URL: &str = "https://oauth.ring.com/oauth/token";
pub const USER_AGENT: &str = "ringarchive-rs/0.1";

/// Upper bound on establishing a connection, capped by the request timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const CLIENT_ID: &str = "ring_official_android";
const SCOPE: &str = "client";

/// Bearer token pair issued by the OAuth endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub obtained_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// On-disk cache contents. The hardware id is persisted alongside the token
/// because Ring ties two-factor trust to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenCache {
    hardware_id: String,
    token: Option<Token>,
}

/// Username/password/2FA code, all optional. Only needed without a cache.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub otp: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Issues and refreshes tokens, persisting each one to the cache file.
#[derive(Debug)]
pub struct Authenticator {
    http: Client,
    oauth_url: String,
    cache_path: PathBuf,
    hardware_id: String,
    cached: Option<Token>,
}

impl Authenticator {
    /// Load the cache at `cache_path` (if any). A fresh hardware id is
    /// generated when no cache exists yet.
    ///
    /// `timeout` bounds every request made through this authenticator's
    /// HTTP client, which [`RingClient`](super::client::RingClient) shares.
    pub async fn load(cache_path: &Path, oauth_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let cache_exists = fs::try_exists(cache_path)
            .await
            .with_context(|| format!("Failed to check token cache {}", cache_path.display()))?;
        let cache = if cache_exists {
            let contents = fs::read_to_string(cache_path)
                .await
                .with_context(|| format!("Failed to read token cache {}", cache_path.display()))?;
            serde_json::from_str::<TokenCache>(&contents)
                .with_context(|| format!("Corrupt token cache {}", cache_path.display()))?
        } else {
            TokenCache {
                hardware_id: Uuid::new_v4().to_string(),
                token: None,
            }
        };

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            oauth_url: oauth_url.to_string(),
            cache_path: cache_path.to_path_buf(),
            hardware_id: cache.hardware_id,
            cached: cache.token,
        })
    }

    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    pub(crate) fn http(&self) -> &Client {
        &self.http
    }

    /// Produce a usable token: refresh the cached one, or fall back to a
    /// password grant when there is no cache.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Token, AuthError> {
        if let Some(cached) = &self.cached {
            tracing::debug!("Refreshing cached token from {}", self.cache_path.display());
            match self.refresh(cached).await {
                Ok(token) => return Ok(token),
                Err(e) if credentials.password.is_some() => {
                    tracing::warn!("Cached token refresh failed, logging in again: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        self.password_grant(credentials).await
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh(&self, token: &Token) -> Result<Token, AuthError> {
        let body = json!({
            "client_id": CLIENT_ID,
            "grant_type": "refresh_token",
            "refresh_token": token.refresh_token,
            "scope": SCOPE,
        });
        let response = self
            .http
            .post(&self.oauth_url)
            .header("hardware_id", &self.hardware_id)
            .json(&body)
            .send()
            .await?;
        let token = self.read_token(response).await?;
        tracing::debug!("Token refreshed");
        Ok(token)
    }

    async fn password_grant(&self, credentials: &Credentials) -> Result<Token, AuthError> {
        let (Some(username), Some(password)) = (&credentials.username, &credentials.password)
        else {
            return Err(AuthError::MissingCredentials(
                self.cache_path.display().to_string(),
            ));
        };

        let body = json!({
            "client_id": CLIENT_ID,
            "grant_type": "password",
            "username": username,
            "password": password,
            "scope": SCOPE,
        });
        let mut request = self
            .http
            .post(&self.oauth_url)
            .header("hardware_id", &self.hardware_id)
            .header("2fa-support", "true")
            .json(&body);
        if let Some(otp) = &credentials.otp {
            request = request.header("2fa-code", otp.as_str());
        }

        let response = request.send().await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Err(AuthError::TwoFactorRequired);
        }
        let token = self.read_token(response).await?;
        tracing::info!("Logged in as {}", username);
        Ok(token)
    }

    async fn read_token(&self, response: reqwest::Response) -> Result<Token, AuthError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        let mut token: Token = response.json().await?;
        token.obtained_at = Some(Utc::now());
        self.save(&token).await?;
        Ok(token)
    }

    async fn save(&self, token: &Token) -> Result<(), AuthError> {
        if let Some(parent) = self.cache_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let cache = TokenCache {
            hardware_id: self.hardware_id.clone(),
            token: Some(token.clone()),
        };
        let contents = serde_json::to_string_pretty(&cache)?;
        let tmp = self.cache_path.with_extension("json.tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &self.cache_path).await?;
        tracing::debug!("Token cache written to {}", self.cache_path.display());
        Ok(())
    }
}

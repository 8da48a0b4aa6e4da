//! Bearer credentials for the vendor API.
//!
//! The initial OAuth consent happens out of band; this module only loads the
//! stored result and keeps it fresh with the `refresh_token` grant.
//!
//! # Single-flight refresh
//!
//! Each [`Credential`] carries the generation it was issued in. A caller that
//! got a 401 hands its stale credential to [`Authenticator::refresh`]; if the
//! generation has already moved on, the newer credential is returned without
//! another network round trip. The refresh itself runs while holding the
//! token lock, so concurrent callers queue behind the one in progress.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Default OAuth2 token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens expiring within this many seconds are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Errors raised while loading or refreshing credentials.
///
/// Messages never include token values.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The credential file could not be read.
    #[error("failed to read credential file: {path}")]
    Read {
        /// Path to the credential file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The credential file is not valid JSON of the expected shape.
    #[error("failed to parse credential file: {path}")]
    Parse {
        /// Path to the credential file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The credential file parsed but is unusable.
    #[error("invalid stored credential: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },

    /// The token endpoint rejected the refresh.
    #[error("token refresh rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error description from the token endpoint.
        message: String,
    },

    /// The token endpoint could not be reached.
    #[error("token refresh request failed")]
    Request(#[from] reqwest::Error),
}

/// A bearer token tagged with the refresh generation that produced it.
#[derive(Clone)]
pub struct Credential {
    token: Arc<str>,
    generation: u64,
}

impl Credential {
    /// Creates a credential.
    #[must_use]
    pub fn new(token: impl Into<Arc<str>>, generation: u64) -> Self {
        Self {
            token: token.into(),
            generation,
        }
    }

    /// The raw bearer token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Refresh generation this token belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Supplies bearer credentials for vendor API calls.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Returns a credential that is valid now.
    async fn bearer(&self) -> Result<Credential, AuthError>;

    /// Replaces `stale` after the API rejected it.
    ///
    /// If another caller already refreshed past `stale`, returns that result.
    async fn refresh(&self, stale: &Credential) -> Result<Credential, AuthError>;
}

/// On-disk credential format.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredToken {
    /// Current access token.
    pub access_token: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
    /// Access token expiry as Unix seconds, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Token endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
}

impl StoredToken {
    fn validate(&self) -> Result<(), AuthError> {
        let missing = [
            ("access_token", &self.access_token),
            ("refresh_token", &self.refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        if let Some((field, _)) = missing {
            return Err(AuthError::Invalid {
                message: format!("{field} is empty"),
            });
        }
        Ok(())
    }

    fn expires_soon(&self, now: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - EXPIRY_SKEW_SECS <= now)
    }
}

/// Token endpoint response for the `refresh_token` grant.
#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenState {
    token: StoredToken,
    generation: u64,
}

/// Authenticator backed by a credential file, refreshed via OAuth2.
pub struct StoredTokenAuthenticator {
    path: PathBuf,
    http: reqwest::Client,
    state: Mutex<TokenState>,
}

impl StoredTokenAuthenticator {
    /// Loads and validates the stored credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable, malformed, or has
    /// empty fields, or if the HTTP client cannot be built.
    pub fn load(path: &Path, timeout: Duration) -> Result<Self, AuthError> {
        let contents = std::fs::read_to_string(path).map_err(|e| AuthError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let token: StoredToken = serde_json::from_str(&contents).map_err(|e| AuthError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        token.validate()?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            path: path.to_path_buf(),
            http,
            state: Mutex::new(TokenState {
                token,
                generation: 0,
            }),
        })
    }

    /// Exchanges the refresh token for a new access token. Caller holds the lock.
    async fn refresh_locked(&self, state: &mut TokenState) -> Result<Credential, AuthError> {
        let token_uri = state
            .token
            .token_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string());

        tracing::debug!(generation = state.generation, "Refreshing access token");

        let resp = self
            .http
            .post(&token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", state.token.refresh_token.as_str()),
                ("client_id", state.token.client_id.as_str()),
                ("client_secret", state.token.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("error_description")
                        .or_else(|| v.get("error"))
                        .and_then(serde_json::Value::as_str)
                        .map(String::from)
                })
                .unwrap_or_else(|| "token endpoint returned an error".to_string());
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let refreshed: RefreshResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Invalid {
                message: format!("token endpoint response: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        state.token.access_token = refreshed.access_token;
        state.token.expires_at = refreshed.expires_in.map(|secs| now + secs);
        if let Some(rotated) = refreshed.refresh_token {
            state.token.refresh_token = rotated;
        }
        state.generation += 1;

        tracing::info!(generation = state.generation, "Access token refreshed");
        self.persist(&state.token).await;

        Ok(Credential::new(
            state.token.access_token.as_str(),
            state.generation,
        ))
    }

    /// Writes the refreshed token back; failure only costs a refresh next start.
    async fn persist(&self, token: &StoredToken) {
        let json = match serde_json::to_string_pretty(token) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialise refreshed credential");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&self.path, json).await {
            tracing::warn!(
                error = %e,
                path = %self.path.display(),
                "Failed to persist refreshed credential"
            );
        }
    }
}

#[async_trait]
impl Authenticator for StoredTokenAuthenticator {
    async fn bearer(&self) -> Result<Credential, AuthError> {
        let mut state = self.state.lock().await;
        if state.token.expires_soon(chrono::Utc::now().timestamp()) {
            return self.refresh_locked(&mut state).await;
        }
        Ok(Credential::new(
            state.token.access_token.as_str(),
            state.generation,
        ))
    }

    async fn refresh(&self, stale: &Credential) -> Result<Credential, AuthError> {
        let mut state = self.state.lock().await;
        if state.generation != stale.generation() {
            return Ok(Credential::new(
                state.token.access_token.as_str(),
                state.generation,
            ));
        }
        self.refresh_locked(&mut state).await
    }
}

//! OAuth bearer-token acquisition.
//!
//! The consent flow itself lives outside this crate; providers here only hand
//! out an already-issued access token and are asked to refresh it once when
//! the remote rejects it.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::clock::Clock;
use crate::domain::UtcDateTime;

pub const ACCESS_TOKEN_ENV: &str = "TUBEQUOTA_ACCESS_TOKEN";
pub const FALLBACK_ACCESS_TOKEN_ENV: &str = "YOUTUBE_ACCESS_TOKEN";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no access token found (set {ACCESS_TOKEN_ENV} or pass a token file)")]
    Missing,
    #[error("access token expired at {expires_at}")]
    Expired { expires_at: String },
    #[error("token file '{path}' could not be read: {message}")]
    Unreadable { path: PathBuf, message: String },
}

pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String, AuthError>> + Send + 'a>>;

/// Source of bearer tokens for authenticated operations.
pub trait TokenProvider: Send + Sync {
    fn access_token<'a>(&'a self) -> TokenFuture<'a>;

    /// Forget any cached token so the next call re-reads its source.
    fn invalidate(&self) {}
}

/// Fixed token, mostly for tests.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn access_token<'a>(&'a self) -> TokenFuture<'a> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}

/// Reads the token from the environment on every call.
#[derive(Debug, Clone, Default)]
pub struct EnvTokenProvider;

impl TokenProvider for EnvTokenProvider {
    fn access_token<'a>(&'a self) -> TokenFuture<'a> {
        Box::pin(async move {
            [ACCESS_TOKEN_ENV, FALLBACK_ACCESS_TOKEN_ENV]
                .into_iter()
                .find_map(|name| std::env::var(name).ok())
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .ok_or(AuthError::Missing)
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    access_token: String,
    #[serde(default)]
    expires_at: Option<UtcDateTime>,
}

/// Reads `{"access_token": ..., "expires_at": ...}` written by an external
/// refresher; the file is re-read after [`TokenProvider::invalidate`].
pub struct FileTokenProvider {
    path: PathBuf,
    clock: std::sync::Arc<dyn Clock>,
    cached: Mutex<Option<String>>,
}

impl std::fmt::Debug for FileTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTokenProvider")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
            cached: Mutex::new(None),
        }
    }

    async fn read(&self) -> Result<String, AuthError> {
        let unreadable = |message: String| AuthError::Unreadable {
            path: self.path.clone(),
            message,
        };
        let raw = tokio::fs::read(&self.path)
            .await
            .map_err(|error| unreadable(error.to_string()))?;
        let file: TokenFile =
            serde_json::from_slice(&raw).map_err(|error| unreadable(error.to_string()))?;

        if let Some(expires_at) = file.expires_at {
            if self.clock.now() >= expires_at {
                return Err(AuthError::Expired {
                    expires_at: expires_at.format_rfc3339(),
                });
            }
        }
        if file.access_token.trim().is_empty() {
            return Err(AuthError::Missing);
        }
        Ok(file.access_token.trim().to_owned())
    }
}

impl TokenProvider for FileTokenProvider {
    fn access_token<'a>(&'a self) -> TokenFuture<'a> {
        Box::pin(async move {
            let cached = self
                .cached
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(token) = cached {
                return Ok(token);
            }

            let token = self.read().await?;
            *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
            Ok(token)
        })
    }

    fn invalidate(&self) {
        debug!(path = %self.path.display(), "invalidating cached access token");
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

//! Bearer tokens for the Cloud Storage and BigQuery REST APIs

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// Environment variable holding a ready-made OAuth access token
pub const ACCESS_TOKEN_VAR: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Source of OAuth access tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> IngestResult<String>;
}

/// Token resolved from the ambient environment.
///
/// Looks at `GOOGLE_OAUTH_ACCESS_TOKEN` first, then asks the `gcloud` CLI.
/// The token is resolved once and reused for the rest of the run.
#[derive(Default)]
pub struct AmbientCredentials {
    token: OnceCell<String>,
}

impl AmbientCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    async fn resolve() -> IngestResult<String> {
        if let Ok(token) = std::env::var(ACCESS_TOKEN_VAR) {
            let token = token.trim().to_string();
            if !token.is_empty() {
                debug!("Using access token from {}", ACCESS_TOKEN_VAR);
                return Ok(token);
            }
        }

        let output = Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| {
                IngestError::CredentialsUnavailable(format!(
                    "{} is unset and gcloud could not be run: {}",
                    ACCESS_TOKEN_VAR, e
                ))
            })?;

        if !output.status.success() {
            return Err(IngestError::CredentialsUnavailable(format!(
                "gcloud auth print-access-token failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(IngestError::CredentialsUnavailable(
                "gcloud returned an empty access token".to_string(),
            ));
        }
        debug!("Using access token from gcloud");
        Ok(token)
    }
}

#[async_trait]
impl TokenProvider for AmbientCredentials {
    async fn access_token(&self) -> IngestResult<String> {
        self.token
            .get_or_try_init(Self::resolve)
            .await
            .map(Clone::clone)
    }
}

/// Fixed token
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> IngestResult<String> {
        Ok(self.0.clone())
    }
}

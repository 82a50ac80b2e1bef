//! Authenticated JSON-over-HTTP helper shared by the Cloud Storage and
//! BigQuery clients

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

use super::auth::TokenProvider;
use crate::error::IngestError;

/// Failure of a single REST call
#[derive(Debug, Error)]
pub enum RestFailure {
    #[error("{0}")]
    Credentials(IngestError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },
}

impl RestFailure {
    /// True if the API answered with `status`
    pub fn is_status(&self, status: StatusCode) -> bool {
        matches!(self, RestFailure::Api { status: s, .. } if *s == status.as_u16())
    }

    /// Map into the pipeline error for the calling operation, keeping
    /// credential failures distinct
    pub fn into_ingest(self, wrap: fn(String) -> IngestError) -> IngestError {
        match self {
            RestFailure::Credentials(err) => err,
            other => wrap(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client that attaches a bearer token to every request
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl RestClient {
    pub fn new(http: Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { http, tokens }
    }

    /// Start a request; `send` finishes it
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// Authenticate, send, and turn non-2xx answers into `RestFailure::Api`
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, RestFailure> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(RestFailure::Credentials)?;
        let response = request.bearer_auth(token).send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RestFailure::Api {
            status: status.as_u16(),
            message: error_message(&body, status),
        })
    }

    /// `send`, then decode the JSON body
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, RestFailure> {
        Ok(self.send(request).await?.json::<T>().await?)
    }
}

/// Pull `error.message` out of a Google API error body
fn error_message(body: &str, status: StatusCode) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if !body.trim().is_empty() => body.trim().to_string(),
        Err(_) => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    }
}

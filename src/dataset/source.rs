use async_trait::async_trait;
use reqwest::Client;

use crate::error::{IngestError, IngestResult};

/// Where the raw CSV comes from
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Fetch the full file body
    async fn fetch(&self) -> IngestResult<Vec<u8>>;

    /// Human-readable location for log lines
    fn describe(&self) -> String;
}

/// Dataset served over HTTP(S)
pub struct HttpDatasetSource {
    client: Client,
    url: String,
}

impl HttpDatasetSource {
    pub fn new(url: impl Into<String>) -> IngestResult<Self> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl DatasetSource for HttpDatasetSource {
    async fn fetch(&self) -> IngestResult<Vec<u8>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| IngestError::DownloadFailed(format!("GET {}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| IngestError::DownloadFailed(format!("reading body: {}", e)))?;
        Ok(body.to_vec())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

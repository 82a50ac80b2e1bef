use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Method, StatusCode};
use serde::Serialize;

use super::rest::RestClient;
use super::{ObjectStore, StagedObject};
use crate::error::{IngestError, IngestResult};

/// Base URL of the Cloud Storage JSON API
pub const GCS_BASE_URL: &str = "https://storage.googleapis.com";

/// Cloud Storage bucket/object client
pub struct GcsObjectStore {
    rest: RestClient,
    project_id: String,
    base_url: String,
}

#[derive(Serialize)]
struct BucketInsert<'a> {
    name: &'a str,
}

impl GcsObjectStore {
    pub fn new(rest: RestClient, project_id: impl Into<String>) -> Self {
        Self::with_base_url(rest, project_id, GCS_BASE_URL)
    }

    /// Point the client at another endpoint (emulators, tests)
    pub fn with_base_url(
        rest: RestClient,
        project_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            rest,
            project_id: project_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/storage/v1/b/{}", self.base_url, bucket)
    }

    fn upload_url(&self, bucket: &str) -> String {
        format!("{}/upload/storage/v1/b/{}/o", self.base_url, bucket)
    }
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> IngestResult<bool> {
        let request = self.rest.request(Method::GET, &self.bucket_url(bucket));
        match self.rest.send(request).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_status(StatusCode::NOT_FOUND) => Ok(false),
            Err(e) => Err(e.into_ingest(IngestError::BucketUnavailable)),
        }
    }

    async fn create_bucket(&self, bucket: &str) -> IngestResult<()> {
        let request = self
            .rest
            .request(Method::POST, &format!("{}/storage/v1/b", self.base_url))
            .query(&[("project", self.project_id.as_str())])
            .json(&BucketInsert { name: bucket });

        self.rest
            .send(request)
            .await
            .map_err(|e| e.into_ingest(IngestError::BucketUnavailable))?;
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> IngestResult<StagedObject> {
        let size = body.len() as u64;
        // ifGenerationMatch=0: only succeed if no live object has this name
        let request = self
            .rest
            .request(Method::POST, &self.upload_url(bucket))
            .query(&[
                ("uploadType", "media"),
                ("name", key),
                ("ifGenerationMatch", "0"),
            ])
            .header(CONTENT_TYPE, content_type)
            .body(body);

        match self.rest.send(request).await {
            Ok(_) => Ok(StagedObject {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size,
            }),
            Err(e) if e.is_status(StatusCode::PRECONDITION_FAILED) => Err(
                IngestError::ObjectAlreadyExists(super::object_uri(bucket, key)),
            ),
            Err(e) => Err(e.into_ingest(IngestError::UploadFailed)),
        }
    }
}

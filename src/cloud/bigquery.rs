//! BigQuery REST v2 client
//!
//! Only the handful of resources the pipeline needs are modeled: dataset
//! listing/insert, table insert/get, load jobs and synchronous queries.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::rest::RestClient;
use super::{
    Creation, LoadJobConfig, LoadJobOutcome, RowSet, SourceFormat, TableId, Warehouse,
    WriteDisposition,
};
use crate::error::{IngestError, IngestResult};
use crate::quality::QualityQuery;
use crate::schema::TableSchema;

/// Base URL of the BigQuery API
pub const BIGQUERY_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

const JOB_STATE_DONE: &str = "DONE";

/// Server-side wait per `jobs.query` / `jobs.getQueryResults` call
const QUERY_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    project_id: String,
    dataset_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

impl From<&TableId> for TableReference {
    fn from(id: &TableId) -> Self {
        Self {
            project_id: id.project.clone(),
            dataset_id: id.dataset.clone(),
            table_id: id.table.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetList {
    #[serde(default)]
    datasets: Vec<DatasetListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetListEntry {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetInsert {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableInsert<'a> {
    table_reference: TableReference,
    schema: &'a TableSchema,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    num_rows: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobInsert<'a> {
    configuration: JobConfiguration<'a>,
}

#[derive(Debug, Serialize)]
struct JobConfiguration<'a> {
    load: JobConfigurationLoad<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobConfigurationLoad<'a> {
    source_uris: Vec<String>,
    destination_table: TableReference,
    source_format: SourceFormat,
    skip_leading_rows: u32,
    autodetect: bool,
    write_disposition: WriteDisposition,
    allow_quoted_newlines: bool,
    allow_jagged_rows: bool,
    schema: &'a TableSchema,
}

impl<'a> JobConfigurationLoad<'a> {
    fn new(source_uri: &str, table: &TableId, config: &'a LoadJobConfig) -> Self {
        Self {
            source_uris: vec![source_uri.to_string()],
            destination_table: table.into(),
            source_format: config.source_format,
            skip_leading_rows: config.skip_leading_rows,
            autodetect: config.autodetect,
            write_disposition: config.write_disposition,
            allow_quoted_newlines: config.allow_quoted_newlines,
            allow_jagged_rows: config.allow_jagged_rows,
            schema: &config.schema,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    status: Option<JobStatus>,
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

impl ErrorProto {
    fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{}: {}", reason, message),
            (None, Some(message)) => message.clone(),
            (Some(reason), None) => reason.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    output_rows: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<ResponseSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
struct ResponseSchema {
    #[serde(default)]
    fields: Vec<ResponseField>,
}

#[derive(Debug, Deserialize)]
struct ResponseField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

impl QueryResponse {
    fn into_row_set(self) -> RowSet {
        let columns = self
            .schema
            .map(|s| s.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default();
        let rows = self
            .rows
            .into_iter()
            .map(|row| row.f.into_iter().map(|cell| cell_text(cell.v)).collect())
            .collect();
        RowSet::new(columns, rows)
    }
}

/// BigQuery returns every scalar as a JSON string; NULL stays `None`
fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// Client
// ============================================================================

/// BigQuery warehouse client bound to one project
pub struct BigQueryWarehouse {
    rest: RestClient,
    project_id: String,
    base_url: String,
    poll_interval: Duration,
}

impl BigQueryWarehouse {
    pub fn new(rest: RestClient, project_id: impl Into<String>, poll_interval: Duration) -> Self {
        Self::with_base_url(rest, project_id, poll_interval, BIGQUERY_BASE_URL)
    }

    /// Point the client at another endpoint (emulators, tests)
    pub fn with_base_url(
        rest: RestClient,
        project_id: impl Into<String>,
        poll_interval: Duration,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            rest,
            project_id: project_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval,
        }
    }

    fn project_url(&self, project: &str) -> String {
        format!("{}/projects/{}", self.base_url, project)
    }

    fn table_url(&self, table: &TableId) -> String {
        format!(
            "{}/datasets/{}/tables/{}",
            self.project_url(&table.project),
            table.dataset,
            table.table
        )
    }

    async fn get_job(&self, reference: &JobReference) -> IngestResult<Job> {
        let mut request = self.rest.request(
            Method::GET,
            &format!("{}/jobs/{}", self.project_url(&self.project_id), reference.job_id),
        );
        if let Some(location) = &reference.location {
            request = request.query(&[("location", location)]);
        }
        self.rest
            .send_json(request)
            .await
            .map_err(|e| e.into_ingest(IngestError::LoadJobFailed))
    }

    async fn get_query_results(&self, reference: &JobReference) -> IngestResult<QueryResponse> {
        let mut request = self
            .rest
            .request(
                Method::GET,
                &format!(
                    "{}/queries/{}",
                    self.project_url(&self.project_id),
                    reference.job_id
                ),
            )
            .query(&[("timeoutMs", QUERY_TIMEOUT_MS.to_string())]);
        if let Some(location) = &reference.location {
            request = request.query(&[("location", location)]);
        }
        self.rest
            .send_json(request)
            .await
            .map_err(|e| e.into_ingest(IngestError::QueryFailed))
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_datasets(&self) -> IngestResult<Vec<String>> {
        let url = format!("{}/datasets", self.project_url(&self.project_id));
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.rest.request(Method::GET, &url);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }
            let page: DatasetList = self
                .rest
                .send_json(request)
                .await
                .map_err(|e| e.into_ingest(IngestError::WarehouseUnreachable))?;

            names.extend(
                page.datasets
                    .into_iter()
                    .map(|d| d.dataset_reference.dataset_id),
            );
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(names)
    }

    async fn ensure_dataset(&self, table: &TableId) -> IngestResult<Creation> {
        let request = self
            .rest
            .request(
                Method::POST,
                &format!("{}/datasets", self.project_url(&table.project)),
            )
            .json(&DatasetInsert {
                dataset_reference: DatasetReference {
                    project_id: table.project.clone(),
                    dataset_id: table.dataset.clone(),
                },
            });

        match self.rest.send(request).await {
            Ok(_) => Ok(Creation::Created),
            Err(e) if e.is_status(StatusCode::CONFLICT) => Ok(Creation::AlreadyExists),
            Err(e) => Err(e.into_ingest(IngestError::TableCreationFailed)),
        }
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> IngestResult<Creation> {
        let request = self
            .rest
            .request(
                Method::POST,
                &format!(
                    "{}/datasets/{}/tables",
                    self.project_url(&table.project),
                    table.dataset
                ),
            )
            .json(&TableInsert {
                table_reference: table.into(),
                schema,
            });

        match self.rest.send(request).await {
            Ok(_) => Ok(Creation::Created),
            Err(e) if e.is_status(StatusCode::CONFLICT) => Ok(Creation::AlreadyExists),
            Err(e) => Err(e.into_ingest(IngestError::TableCreationFailed)),
        }
    }

    async fn load_from_uri(
        &self,
        source_uri: &str,
        table: &TableId,
        config: &LoadJobConfig,
    ) -> IngestResult<LoadJobOutcome> {
        let body = JobInsert {
            configuration: JobConfiguration {
                load: JobConfigurationLoad::new(source_uri, table, config),
            },
        };
        let request = self
            .rest
            .request(
                Method::POST,
                &format!("{}/jobs", self.project_url(&self.project_id)),
            )
            .json(&body);

        let mut job: Job = self
            .rest
            .send_json(request)
            .await
            .map_err(|e| e.into_ingest(IngestError::LoadJobFailed))?;

        let reference = job.job_reference.clone();
        debug!(job_id = %reference.job_id, "Load job submitted");

        while job.status.as_ref().map(|s| s.state.as_str()) != Some(JOB_STATE_DONE) {
            tokio::time::sleep(self.poll_interval).await;
            job = self.get_job(&reference).await?;
            debug!(
                job_id = %reference.job_id,
                state = job.status.as_ref().map(|s| s.state.as_str()).unwrap_or("UNKNOWN"),
                "Polled load job"
            );
        }

        job_outcome(job)
    }

    async fn table_row_count(&self, table: &TableId) -> IngestResult<u64> {
        let request = self.rest.request(Method::GET, &self.table_url(table));
        let resource: TableResource = self
            .rest
            .send_json(request)
            .await
            .map_err(|e| e.into_ingest(IngestError::QueryFailed))?;

        resource
            .num_rows
            .unwrap_or_else(|| "0".to_string())
            .parse()
            .map_err(|e| IngestError::UnexpectedRows(format!("numRows: {}", e)))
    }

    async fn run_quality_query(
        &self,
        table: &TableId,
        query: &QualityQuery,
    ) -> IngestResult<RowSet> {
        let request = self
            .rest
            .request(
                Method::POST,
                &format!("{}/queries", self.project_url(&self.project_id)),
            )
            .json(&QueryRequest {
                query: query.sql(table),
                use_legacy_sql: false,
                timeout_ms: QUERY_TIMEOUT_MS,
            });

        let mut response: QueryResponse = self
            .rest
            .send_json(request)
            .await
            .map_err(|e| e.into_ingest(IngestError::QueryFailed))?;

        while !response.job_complete {
            let reference = response.job_reference.clone().ok_or_else(|| {
                IngestError::QueryFailed("incomplete query without a job reference".to_string())
            })?;
            tokio::time::sleep(self.poll_interval).await;
            response = self.get_query_results(&reference).await?;
        }

        Ok(response.into_row_set())
    }
}

/// Turn a DONE job into an outcome or a load failure
fn job_outcome(job: Job) -> IngestResult<LoadJobOutcome> {
    let job_id = job.job_reference.job_id;
    if let Some(status) = job.status {
        if let Some(error) = status.error_result {
            let mut message = error.describe();
            if status.errors.len() > 1 {
                message.push_str(&format!(" (+{} more errors)", status.errors.len() - 1));
            }
            return Err(IngestError::LoadJobFailed(format!("job {}: {}", job_id, message)));
        }
    }

    let output_rows = job
        .statistics
        .and_then(|s| s.load)
        .and_then(|l| l.output_rows)
        .and_then(|rows| rows.parse().ok());

    Ok(LoadJobOutcome {
        job_id,
        output_rows,
    })
}

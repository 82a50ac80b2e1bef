//! End-to-end runs against the in-memory backend and a local HTTP server

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use covid_ingest::cloud::{
    CloudClients, Creation, LoadJobConfig, LoadJobOutcome, MemoryObjectStore, MemoryWarehouse,
    RowSet, TableId, Warehouse,
};
use covid_ingest::config::{Backend, PipelineConfig};
use covid_ingest::dataset::HttpDatasetSource;
use covid_ingest::error::{ErrorKind, IngestError, IngestResult};
use covid_ingest::pipeline::{ingest_pipeline, PipelineContext};
use covid_ingest::quality::QualityQuery;
use covid_ingest::schema::TableSchema;

const DATASET: &str = "iso_code,continent,location,date,total_cases,new_cases,total_deaths,new_deaths,new_tests,total_vaccinations,people_vaccinated,people_fully_vaccinated,population\n\
AFG,Asia,Afghanistan,2021-01-01,100,10,5,1,7,,,,39835428\n\
OWID_WRL,,World,2021-01-02,5000000,1000,100000,50,,,,,7874965732\n\
ALB,Europe,Albania,2021-01-03,50,5,1,0,,,,,2872934\n";

const RANKING_DATASET: &str = "iso_code,continent,location,date,total_cases\n\
AAA,Asia,A,2021-01-01,10\n\
BBB,Asia,B,2021-01-01,20\n\
CCC,Europe,C,2021-01-01,30\n\
DDD,Europe,D,2021-01-01,40\n\
EEE,Africa,E,2021-01-01,50\n\
FFF,Africa,F,2021-01-01,60\n\
GGG,Oceania,G,2021-01-01,70\n\
OWID_WRL,,World,2021-01-01,99999\n";

/// Serve every request with `status_line` and `body`
async fn serve(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: text/csv\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{}/owid-covid-data.csv", addr)
}

struct Harness {
    config: PipelineConfig,
    objects: Arc<MemoryObjectStore>,
    warehouse: Arc<MemoryWarehouse>,
    clients: CloudClients,
    source: Arc<HttpDatasetSource>,
}

async fn harness(status_line: &'static str, body: &'static str) -> Harness {
    let url = serve(status_line, body).await;
    let config = PipelineConfig {
        project_id: "proj".to_string(),
        bucket_name: "covid-raw".to_string(),
        dataset_source_url: url.clone(),
        backend: Backend::Memory,
        ..PipelineConfig::default()
    };

    let objects = Arc::new(MemoryObjectStore::new());
    let warehouse = Arc::new(MemoryWarehouse::new("proj", objects.clone()));
    let clients = CloudClients::new(objects.clone(), warehouse.clone());
    let http = Client::builder().no_proxy().build().unwrap();
    let source = Arc::new(HttpDatasetSource::with_client(http, url));

    Harness {
        config,
        objects,
        warehouse,
        clients,
        source,
    }
}

/// Warehouse call that [`FaultyWarehouse`] fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    ListDatasets,
    CreateTable,
    LoadJob,
}

/// Memory warehouse with one failing operation. Counts quality queries.
struct FaultyWarehouse {
    inner: Arc<MemoryWarehouse>,
    fault: Fault,
    quality_queries: AtomicUsize,
}

impl FaultyWarehouse {
    fn quality_queries(&self) -> usize {
        self.quality_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Warehouse for FaultyWarehouse {
    fn project_id(&self) -> &str {
        self.inner.project_id()
    }

    async fn list_datasets(&self) -> IngestResult<Vec<String>> {
        if self.fault == Fault::ListDatasets {
            return Err(IngestError::WarehouseUnreachable("connection refused".to_string()));
        }
        self.inner.list_datasets().await
    }

    async fn ensure_dataset(&self, table: &TableId) -> IngestResult<Creation> {
        self.inner.ensure_dataset(table).await
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> IngestResult<Creation> {
        if self.fault == Fault::CreateTable {
            return Err(IngestError::TableCreationFailed("permission denied".to_string()));
        }
        self.inner.create_table(table, schema).await
    }

    async fn load_from_uri(
        &self,
        source_uri: &str,
        table: &TableId,
        config: &LoadJobConfig,
    ) -> IngestResult<LoadJobOutcome> {
        if self.fault == Fault::LoadJob {
            return Err(IngestError::LoadJobFailed("too many errors".to_string()));
        }
        self.inner.load_from_uri(source_uri, table, config).await
    }

    async fn table_row_count(&self, table: &TableId) -> IngestResult<u64> {
        self.inner.table_row_count(table).await
    }

    async fn run_quality_query(
        &self,
        table: &TableId,
        query: &QualityQuery,
    ) -> IngestResult<RowSet> {
        self.quality_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.run_quality_query(table, query).await
    }
}

/// Harness whose warehouse fails at `fault`
async fn faulty_harness(fault: Fault) -> (Harness, Arc<FaultyWarehouse>) {
    let mut h = harness("200 OK", DATASET).await;
    let warehouse = Arc::new(FaultyWarehouse {
        inner: h.warehouse.clone(),
        fault,
        quality_queries: AtomicUsize::new(0),
    });
    h.clients = CloudClients::new(h.objects.clone(), warehouse.clone());
    (h, warehouse)
}

fn context_at(second: u32) -> PipelineContext {
    PipelineContext::started_at(Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, second).unwrap())
}

#[tokio::test]
async fn test_full_run_loads_and_checks() {
    let h = harness("200 OK", DATASET).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    let result = pipeline.execute(&mut context).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stage_results.len(), 6);
    assert!(result.stage_results.iter().all(|s| s.success));

    let summary = context.summary().unwrap();
    assert_eq!(summary.row_count, 3);
    assert_eq!(summary.distinct_locations, 3);
    assert_eq!(summary.min_date.unwrap().to_string(), "2021-01-01");
    assert_eq!(summary.max_date.unwrap().to_string(), "2021-01-03");

    let staged = context.staged().unwrap();
    assert_eq!(staged.uri(), "gs://covid-raw/raw/covid_data_20240309_070502.csv");
    assert_eq!(h.objects.keys("covid-raw"), vec![staged.key.clone()]);

    let table = h.config.table_id();
    assert_eq!(context.table().unwrap(), &table);
    assert_eq!(context.loaded_rows(), Some(3));
    assert_eq!(h.warehouse.table(&table).unwrap().rows.len(), 3);

    let report = context.quality().unwrap();
    assert!(report.all_passed());
    assert_eq!(report.record_count(), Some(3));
    let top: Vec<_> = report
        .top_locations()
        .unwrap()
        .iter()
        .map(|l| (l.location.clone(), l.max_cases))
        .collect();
    assert_eq!(
        top,
        vec![
            ("Afghanistan".to_string(), Some(100.0)),
            ("Albania".to_string(), Some(50.0)),
        ]
    );
}

#[tokio::test]
async fn test_extra_source_columns_are_dropped() {
    let h = harness("200 OK", DATASET).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    pipeline.execute(&mut context).await;

    let key = &context.staged().unwrap().key;
    let object = h.objects.get("covid-raw", key).unwrap();
    let text = String::from_utf8(object.body).unwrap();
    assert!(!text.lines().next().unwrap().contains("new_tests"));

    let table = h.warehouse.table(&h.config.table_id()).unwrap();
    let population = table.schema.position("population").unwrap();
    assert_eq!(table.rows[0][population].as_deref(), Some("39835428"));
}

#[tokio::test]
async fn test_http_500_stops_after_download() {
    let h = harness("500 Internal Server Error", "").await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    let result = pipeline.execute(&mut context).await;

    assert!(!result.success);
    assert_eq!(result.stage_results.len(), 2);
    let failed = result.failed_stage().unwrap();
    assert_eq!(failed.stage_name, "Download Dataset");
    assert_eq!(failed.error_kind, Some(ErrorKind::Download));

    assert_eq!(h.objects.object_count(), 0);
    assert!(h.warehouse.list_datasets().await.unwrap().is_empty());
    assert!(h.warehouse.table(&h.config.table_id()).is_none());
    assert!(context.staged().is_err());
}

#[tokio::test]
async fn test_rerun_replaces_table_contents() {
    let h = harness("200 OK", DATASET).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);

    let first = pipeline.execute(&mut context_at(2)).await;
    let second = pipeline.execute(&mut context_at(3)).await;

    assert!(first.success && second.success);
    assert_eq!(h.objects.object_count(), 2);
    assert_eq!(
        h.warehouse.table_row_count(&h.config.table_id()).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_same_second_rerun_never_overwrites() {
    let h = harness("200 OK", DATASET).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);

    assert!(pipeline.execute(&mut context_at(2)).await.success);
    let result = pipeline.execute(&mut context_at(2)).await;

    assert!(!result.success);
    let failed = result.failed_stage().unwrap();
    assert_eq!(failed.stage_name, "Stage to Object Store");
    assert_eq!(
        failed.error.as_deref(),
        Some(
            IngestError::ObjectAlreadyExists(
                "gs://covid-raw/raw/covid_data_20240309_070502.csv".to_string()
            )
            .to_string()
            .as_str()
        )
    );
    assert_eq!(result.stage_results.len(), 3);
    assert_eq!(h.objects.object_count(), 1);
}

#[tokio::test]
async fn test_quality_failure_keeps_run_successful() {
    let h = harness("200 OK", DATASET).await;
    h.warehouse.fail_query(QualityQuery::DateRange.name());
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    let result = pipeline.execute(&mut context).await;

    assert!(result.success);
    assert!(result.failed_stage().is_none());
    assert_eq!(result.warnings().count(), 1);

    let report = context.quality().unwrap();
    assert_eq!(report.checks.len(), 3);
    assert_eq!(report.failed_checks(), 1);
    assert_eq!(report.record_count(), Some(3));
    assert!(report.top_locations().is_some());
}

#[tokio::test]
async fn test_run_with_uses_given_collaborators() {
    let h = harness("200 OK", DATASET).await;

    let run = covid_ingest::run_with(&h.config, h.source.clone(), &h.clients).await;

    assert!(run.result.success);
    assert_eq!(run.context.loaded_rows(), Some(3));
}

#[tokio::test]
async fn test_connectivity_failure_stops_before_download() {
    let (h, _) = faulty_harness(Fault::ListDatasets).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    let result = pipeline.execute(&mut context).await;

    assert!(!result.success);
    assert_eq!(result.stage_results.len(), 1);
    let failed = result.failed_stage().unwrap();
    assert_eq!(failed.stage_name, "Connectivity Check");
    assert_eq!(failed.error_kind, Some(ErrorKind::Connectivity));

    assert!(context.summary().is_none());
    assert_eq!(h.objects.object_count(), 0);
    assert!(h.warehouse.list_datasets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_table_creation_failure_stops_before_load() {
    let (h, warehouse) = faulty_harness(Fault::CreateTable).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    let result = pipeline.execute(&mut context).await;

    assert!(!result.success);
    assert_eq!(result.stage_results.len(), 4);
    let failed = result.failed_stage().unwrap();
    assert_eq!(failed.stage_name, "Ensure Target Table");
    assert_eq!(failed.error_kind, Some(ErrorKind::Schema));

    // The file is staged but nothing reaches the warehouse
    assert_eq!(h.objects.object_count(), 1);
    assert!(context.table().is_err());
    assert!(h.warehouse.table(&h.config.table_id()).is_none());
    assert_eq!(context.loaded_rows(), None);
    assert!(context.quality().is_none());
    assert_eq!(warehouse.quality_queries(), 0);
}

#[tokio::test]
async fn test_load_failure_skips_quality_checks() {
    let (h, warehouse) = faulty_harness(Fault::LoadJob).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    let result = pipeline.execute(&mut context).await;

    assert!(!result.success);
    assert_eq!(result.stage_results.len(), 5);
    let failed = result.failed_stage().unwrap();
    assert_eq!(failed.stage_name, "Load Table");
    assert_eq!(failed.error_kind, Some(ErrorKind::LoadJob));

    assert_eq!(warehouse.quality_queries(), 0);
    assert!(context.quality().is_none());
    assert_eq!(context.loaded_rows(), None);
    assert!(h.warehouse.table(&h.config.table_id()).unwrap().rows.is_empty());
}

#[tokio::test]
async fn test_top_locations_keeps_five_largest() {
    let h = harness("200 OK", RANKING_DATASET).await;
    let pipeline = ingest_pipeline(&h.config, h.source.clone(), &h.clients);
    let mut context = context_at(2);

    let result = pipeline.execute(&mut context).await;

    assert!(result.success, "{:?}", result.error);
    let report = context.quality().unwrap();
    assert!(report.all_passed());
    assert_eq!(report.record_count(), Some(8));

    let top: Vec<_> = report
        .top_locations()
        .unwrap()
        .iter()
        .map(|l| (l.location.as_str(), l.max_cases))
        .collect();
    assert_eq!(
        top,
        vec![
            ("G", Some(70.0)),
            ("F", Some(60.0)),
            ("E", Some(50.0)),
            ("D", Some(40.0)),
            ("C", Some(30.0)),
        ]
    );
}

use async_trait::async_trait;
use chrono::NaiveDate;
use csv::ReaderBuilder;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use super::{
    parse_object_uri, Creation, LoadJobConfig, LoadJobOutcome, ObjectStore, RowSet, StagedObject,
    TableId, Warehouse, WriteDisposition,
};
use crate::error::{IngestError, IngestResult};
use crate::quality::QualityQuery;
use crate::schema::{FieldType, TableSchema};

/// In-process object store for dry runs and testing
///
/// Objects are never overwritten: a second upload to the same key fails,
/// like an upload with a "does not exist" precondition.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, StoredObject>>>,
}

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with `bucket` already created
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        if let Ok(mut buckets) = store.buckets.lock() {
            buckets.insert(bucket.to_string(), BTreeMap::new());
        }
        store
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.buckets
            .lock()
            .ok()?
            .get(bucket)?
            .get(key)
            .cloned()
    }

    /// Keys in `bucket`, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .ok()
            .and_then(|b| b.get(bucket).map(|objects| objects.keys().cloned().collect()))
            .unwrap_or_default()
    }

    /// Total objects across all buckets
    pub fn object_count(&self) -> usize {
        self.buckets
            .lock()
            .map(|b| b.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    fn lock(
        &self,
    ) -> IngestResult<std::sync::MutexGuard<'_, HashMap<String, BTreeMap<String, StoredObject>>>>
    {
        self.buckets
            .lock()
            .map_err(|_| IngestError::PipelineError("object store lock poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn bucket_exists(&self, bucket: &str) -> IngestResult<bool> {
        Ok(self.lock()?.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> IngestResult<()> {
        let mut buckets = self.lock()?;
        if buckets.contains_key(bucket) {
            return Err(IngestError::BucketUnavailable(format!(
                "bucket {} already exists",
                bucket
            )));
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> IngestResult<StagedObject> {
        let mut buckets = self.lock()?;
        let objects = buckets.get_mut(bucket).ok_or_else(|| {
            IngestError::UploadFailed(format!("bucket {} does not exist", bucket))
        })?;
        if objects.contains_key(key) {
            return Err(IngestError::ObjectAlreadyExists(super::object_uri(
                bucket, key,
            )));
        }

        let size = body.len() as u64;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(StagedObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
        })
    }
}

/// A table held by [`MemoryWarehouse`]
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub schema: TableSchema,
    pub rows: Vec<Vec<Option<String>>>,
}

impl MemoryTable {
    fn column(&self, name: &str) -> IngestResult<usize> {
        self.schema
            .position(name)
            .ok_or_else(|| IngestError::QueryFailed(format!("Unrecognized name: {}", name)))
    }
}

#[derive(Default)]
struct WarehouseState {
    datasets: BTreeSet<(String, String)>,
    tables: HashMap<TableId, MemoryTable>,
}

/// In-process warehouse for dry runs and testing
///
/// Loads read staged objects from a shared [`MemoryObjectStore`] and honor
/// the load options. Only the canned quality queries are supported.
pub struct MemoryWarehouse {
    project_id: String,
    objects: Arc<MemoryObjectStore>,
    state: Mutex<WarehouseState>,
    failing_queries: Mutex<HashSet<String>>,
    job_counter: AtomicU64,
}

impl MemoryWarehouse {
    pub fn new(project_id: impl Into<String>, objects: Arc<MemoryObjectStore>) -> Self {
        Self {
            project_id: project_id.into(),
            objects,
            state: Mutex::new(WarehouseState::default()),
            failing_queries: Mutex::new(HashSet::new()),
            job_counter: AtomicU64::new(0),
        }
    }

    /// Make the quality query named `name` fail from now on
    pub fn fail_query(&self, name: impl Into<String>) {
        if let Ok(mut failing) = self.failing_queries.lock() {
            failing.insert(name.into());
        }
    }

    /// Snapshot of a table
    pub fn table(&self, table: &TableId) -> Option<MemoryTable> {
        self.state.lock().ok()?.tables.get(table).cloned()
    }

    fn lock(&self) -> IngestResult<std::sync::MutexGuard<'_, WarehouseState>> {
        self.state
            .lock()
            .map_err(|_| IngestError::PipelineError("warehouse lock poisoned".to_string()))
    }

    fn query_is_failing(&self, name: &str) -> bool {
        self.failing_queries
            .lock()
            .map(|failing| failing.contains(name))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn list_datasets(&self) -> IngestResult<Vec<String>> {
        Ok(self
            .lock()?
            .datasets
            .iter()
            .filter(|(project, _)| *project == self.project_id)
            .map(|(_, dataset)| dataset.clone())
            .collect())
    }

    async fn ensure_dataset(&self, table: &TableId) -> IngestResult<Creation> {
        let inserted = self
            .lock()?
            .datasets
            .insert((table.project.clone(), table.dataset.clone()));
        Ok(if inserted {
            Creation::Created
        } else {
            Creation::AlreadyExists
        })
    }

    async fn create_table(&self, table: &TableId, schema: &TableSchema) -> IngestResult<Creation> {
        let mut state = self.lock()?;
        if !state
            .datasets
            .contains(&(table.project.clone(), table.dataset.clone()))
        {
            return Err(IngestError::TableCreationFailed(format!(
                "Not found: Dataset {}:{}",
                table.project, table.dataset
            )));
        }
        if state.tables.contains_key(table) {
            return Ok(Creation::AlreadyExists);
        }
        state.tables.insert(
            table.clone(),
            MemoryTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(Creation::Created)
    }

    async fn load_from_uri(
        &self,
        source_uri: &str,
        table: &TableId,
        config: &LoadJobConfig,
    ) -> IngestResult<LoadJobOutcome> {
        let (bucket, key) = parse_object_uri(source_uri)?;
        let object = self
            .objects
            .get(bucket, key)
            .ok_or_else(|| IngestError::LoadJobFailed(format!("Not found: URI {}", source_uri)))?;

        let mut state = self.lock()?;
        let target = state
            .tables
            .get_mut(table)
            .ok_or_else(|| IngestError::LoadJobFailed(format!("Not found: Table {}", table)))?;

        // Parse everything before touching the table so a bad file leaves it intact
        let rows = parse_load_rows(&object.body, &target.schema, config)?;
        let output_rows = rows.len() as u64;

        match config.write_disposition {
            WriteDisposition::WriteTruncate => target.rows = rows,
            WriteDisposition::WriteAppend => target.rows.extend(rows),
            WriteDisposition::WriteEmpty => {
                if !target.rows.is_empty() {
                    return Err(IngestError::LoadJobFailed(format!(
                        "Table {} is not empty",
                        table
                    )));
                }
                target.rows = rows;
            }
        }

        let job_number = self.job_counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        Ok(LoadJobOutcome {
            job_id: format!("memory_load_{}", job_number),
            output_rows: Some(output_rows),
        })
    }

    async fn table_row_count(&self, table: &TableId) -> IngestResult<u64> {
        self.lock()?
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| IngestError::QueryFailed(format!("Not found: Table {}", table)))
    }

    async fn run_quality_query(
        &self,
        table: &TableId,
        query: &QualityQuery,
    ) -> IngestResult<RowSet> {
        if self.query_is_failing(&query.name()) {
            return Err(IngestError::QueryFailed(format!(
                "query '{}' rejected by warehouse",
                query.name()
            )));
        }

        let state = self.lock()?;
        let data = state
            .tables
            .get(table)
            .ok_or_else(|| IngestError::QueryFailed(format!("Not found: Table {}", table)))?;

        match query {
            QualityQuery::TotalRecords => Ok(RowSet::new(
                vec!["count".to_string()],
                vec![vec![Some(data.rows.len().to_string())]],
            )),
            QualityQuery::DateRange => {
                let date = data.column("date")?;
                // ISO dates order lexically
                let dates = data.rows.iter().filter_map(|r| r[date].as_deref());
                let min = dates.clone().min().map(str::to_string);
                let max = dates.max().map(str::to_string);
                Ok(RowSet::new(
                    vec!["min_date".to_string(), "max_date".to_string()],
                    vec![vec![min, max]],
                ))
            }
            QualityQuery::TopLocationsByCases {
                limit,
                excluded_location,
            } => {
                let location = data.column("location")?;
                let continent = data.column("continent")?;
                let cases = data.column("total_cases")?;

                let mut max_by_location: BTreeMap<&str, Option<f64>> = BTreeMap::new();
                for row in &data.rows {
                    let Some(name) = row[location].as_deref() else {
                        continue;
                    };
                    if name == excluded_location || row[continent].is_none() {
                        continue;
                    }
                    let value = row[cases].as_deref().and_then(|v| v.parse::<f64>().ok());
                    let entry = max_by_location.entry(name).or_insert(None);
                    *entry = match (*entry, value) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                }

                let mut ranked: Vec<(&str, Option<f64>)> = max_by_location.into_iter().collect();
                // DESC with NULLs last, ties by name
                ranked.sort_by(|a, b| {
                    let by_cases = match (a.1, b.1) {
                        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
                        (Some(_), None) => Ordering::Less,
                        (None, Some(_)) => Ordering::Greater,
                        (None, None) => Ordering::Equal,
                    };
                    by_cases.then_with(|| a.0.cmp(b.0))
                });
                ranked.truncate(*limit);

                Ok(RowSet::new(
                    vec!["location".to_string(), "max_cases".to_string()],
                    ranked
                        .into_iter()
                        .map(|(name, max)| vec![Some(name.to_string()), max.map(|m| m.to_string())])
                        .collect(),
                ))
            }
        }
    }
}

/// Parse a staged CSV body into typed-checked table rows
fn parse_load_rows(
    body: &[u8],
    schema: &TableSchema,
    config: &LoadJobConfig,
) -> IngestResult<Vec<Vec<Option<String>>>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut rows = Vec::new();
    for (index, record) in rdr
        .records()
        .enumerate()
        .skip(config.skip_leading_rows as usize)
    {
        let line = index + 1;
        let record =
            record.map_err(|e| IngestError::LoadJobFailed(format!("row {}: {}", line, e)))?;

        if record.len() > schema.len() {
            return Err(IngestError::LoadJobFailed(format!(
                "row {}: too many values ({} > {})",
                line,
                record.len(),
                schema.len()
            )));
        }
        if record.len() < schema.len() && !config.allow_jagged_rows {
            return Err(IngestError::LoadJobFailed(format!(
                "row {}: missing required columns",
                line
            )));
        }

        let mut row = Vec::with_capacity(schema.len());
        let values = record.iter().map(Some).chain(std::iter::repeat(None));
        for (field, value) in schema.fields.iter().zip(values) {
            let cell = match value {
                Some(v) if !v.is_empty() => v,
                _ => {
                    row.push(None);
                    continue;
                }
            };
            if cell.contains('\n') && !config.allow_quoted_newlines {
                return Err(IngestError::LoadJobFailed(format!(
                    "row {}: quoted newline in column {}",
                    line, field.name
                )));
            }
            let valid = match field.field_type {
                FieldType::String => true,
                FieldType::Date => NaiveDate::parse_from_str(cell, "%Y-%m-%d").is_ok(),
                FieldType::Float => cell.parse::<f64>().is_ok(),
            };
            if !valid {
                return Err(IngestError::LoadJobFailed(format!(
                    "row {}: could not parse '{}' as {:?} for column {}",
                    line, cell, field.field_type, field.name
                )));
            }
            row.push(Some(cell.to_string()));
        }
        rows.push(row);
    }

    Ok(rows)
}

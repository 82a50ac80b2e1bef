use async_trait::async_trait;
use std::sync::Arc;

use crate::cloud::Warehouse;
use crate::error::{IngestError, IngestResult};
use crate::pipeline::{PipelineContext, PipelineStage};
use crate::quality::{run_checks, QualityQuery};

/// Stage that runs the read-only quality queries
///
/// Non-gating: every query is attempted, failures are recorded in the
/// report, and the stage result never changes the pipeline outcome.
///
/// # Context Requirements
/// - target table id
///
/// # Context Outputs
/// - quality report
pub struct QualityStage {
    warehouse: Arc<dyn Warehouse>,
    queries: Vec<QualityQuery>,
}

impl QualityStage {
    pub fn new(warehouse: Arc<dyn Warehouse>, queries: Vec<QualityQuery>) -> Self {
        Self { warehouse, queries }
    }
}

#[async_trait]
impl PipelineStage for QualityStage {
    async fn execute(&self, context: &mut PipelineContext) -> IngestResult<()> {
        let table = context.table()?.clone();
        let report = run_checks(self.warehouse.as_ref(), &table, &self.queries).await;

        let failed = report.failed_checks();
        let attempted = report.checks.len();
        context.set_quality(report);

        if failed > 0 {
            return Err(IngestError::QueryFailed(format!(
                "{} of {} quality checks failed",
                failed, attempted
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Quality Checks"
    }

    fn is_gating(&self) -> bool {
        false
    }

    fn pre_execute(&self, context: &PipelineContext) -> IngestResult<()> {
        context.table().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{LoadJobConfig, MemoryObjectStore, MemoryWarehouse, ObjectStore, TableId};
    use crate::schema::covid_schema;

    const BODY: &str = "iso_code,continent,location,date,total_cases,new_cases,total_deaths,new_deaths,total_vaccinations,people_vaccinated,people_fully_vaccinated,population\n\
                        AFG,Asia,Afghanistan,2021-01-01,100,,,,,,,\n\
                        OWID_WRL,,World,2021-01-02,5000000,,,,,,,\n\
                        ALB,Europe,Albania,2021-01-03,50,,,,,,,\n";

    async fn loaded_warehouse() -> (Arc<MemoryWarehouse>, TableId) {
        let objects = Arc::new(MemoryObjectStore::with_bucket("covid-raw"));
        let staged = objects
            .upload("covid-raw", "raw/covid_data_1.csv", BODY.as_bytes().to_vec(), "text/csv")
            .await
            .unwrap();
        let warehouse = Arc::new(MemoryWarehouse::new("proj", objects));
        let table = TableId::new("proj", "covid_staging", "raw_covid_data");
        warehouse.ensure_dataset(&table).await.unwrap();
        warehouse.create_table(&table, &covid_schema()).await.unwrap();
        warehouse
            .load_from_uri(&staged.uri(), &table, &LoadJobConfig::csv_replace(covid_schema()))
            .await
            .unwrap();
        (warehouse, table)
    }

    #[tokio::test]
    async fn test_all_checks_pass() {
        let (warehouse, table) = loaded_warehouse().await;
        let stage = QualityStage::new(warehouse, QualityQuery::standard_checks());
        let mut context = PipelineContext::new();
        context.set_table(table);

        stage.execute(&mut context).await.unwrap();

        let report = context.quality().unwrap();
        assert!(report.all_passed());
        assert_eq!(report.record_count(), Some(3));
        let top: Vec<_> = report
            .top_locations()
            .unwrap()
            .iter()
            .map(|l| (l.location.as_str(), l.max_cases))
            .collect();
        assert_eq!(top, vec![("Afghanistan", Some(100.0)), ("Albania", Some(50.0))]);
    }

    #[tokio::test]
    async fn test_failed_query_does_not_stop_others() {
        let (warehouse, table) = loaded_warehouse().await;
        warehouse.fail_query(QualityQuery::TotalRecords.name());
        let stage = QualityStage::new(warehouse, QualityQuery::standard_checks());
        let mut context = PipelineContext::new();
        context.set_table(table);

        let result = stage.execute(&mut context).await;

        assert!(matches!(result, Err(IngestError::QueryFailed(_))));
        let report = context.quality().unwrap();
        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.failed_checks(), 1);
        assert!(report.date_range().is_some());
        assert!(report.top_locations().is_some());
    }

    #[test]
    fn test_stage_is_not_gating() {
        let warehouse = Arc::new(MemoryWarehouse::new(
            "proj",
            Arc::new(MemoryObjectStore::new()),
        ));
        assert!(!QualityStage::new(warehouse, Vec::new()).is_gating());
    }
}

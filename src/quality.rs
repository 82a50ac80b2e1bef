//! Read-only quality checks run against the loaded table
//!
//! Each check is a canned query with its own typed result record. Checks are
//! best effort: a failing query is recorded in the [`QualityReport`] and the
//! remaining checks still run.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

use crate::cloud::{RowSet, TableId, Warehouse};
use crate::error::{IngestError, IngestResult};

/// Aggregate row excluded from the per-location ranking
pub const WORLD_AGGREGATE: &str = "World";

/// Size of the per-location ranking
pub const TOP_LOCATIONS_LIMIT: usize = 5;

/// The canned quality queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityQuery {
    /// `COUNT(*)` over the table
    TotalRecords,

    /// `MIN(date)` / `MAX(date)`
    DateRange,

    /// Locations ranked by their maximum cumulative case count. Rows without
    /// a continent are aggregates and never ranked.
    TopLocationsByCases {
        limit: usize,
        excluded_location: String,
    },
}

impl QualityQuery {
    pub fn top_locations(limit: usize) -> Self {
        QualityQuery::TopLocationsByCases {
            limit,
            excluded_location: WORLD_AGGREGATE.to_string(),
        }
    }

    /// Checks run after every successful load, in order
    pub fn standard_checks() -> Vec<Self> {
        vec![
            QualityQuery::TotalRecords,
            QualityQuery::DateRange,
            QualityQuery::top_locations(TOP_LOCATIONS_LIMIT),
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            QualityQuery::TotalRecords => "total_records",
            QualityQuery::DateRange => "date_range",
            QualityQuery::TopLocationsByCases { .. } => "top_locations_by_cases",
        }
    }

    /// Standard SQL text for `table`
    pub fn sql(&self, table: &TableId) -> String {
        match self {
            QualityQuery::TotalRecords => {
                format!("SELECT COUNT(*) as count FROM `{}`", table)
            }
            QualityQuery::DateRange => format!(
                "SELECT MIN(date) as min_date, MAX(date) as max_date FROM `{}`",
                table
            ),
            QualityQuery::TopLocationsByCases {
                limit,
                excluded_location,
            } => format!(
                "SELECT location, MAX(total_cases) as max_cases \
                 FROM `{}` \
                 WHERE location != '{}' AND continent IS NOT NULL \
                 GROUP BY location \
                 ORDER BY max_cases DESC, location \
                 LIMIT {}",
                table,
                escape_literal(excluded_location),
                limit
            ),
        }
    }

    /// Decode the row set returned for this query
    pub fn decode(&self, rows: &RowSet) -> IngestResult<QualityOutcome> {
        match self {
            QualityQuery::TotalRecords => {
                let count = rows
                    .cell(0, "count")
                    .ok_or_else(|| unexpected(self, "no count returned"))?
                    .parse::<u64>()
                    .map_err(|e| unexpected(self, &e.to_string()))?;
                Ok(QualityOutcome::RecordCount(RecordCount { count }))
            }
            QualityQuery::DateRange => {
                if rows.is_empty() {
                    return Err(unexpected(self, "no rows returned"));
                }
                Ok(QualityOutcome::DateRange(DateRange {
                    min_date: parse_date(self, rows.cell(0, "min_date"))?,
                    max_date: parse_date(self, rows.cell(0, "max_date"))?,
                }))
            }
            QualityQuery::TopLocationsByCases { .. } => {
                let mut ranked = Vec::with_capacity(rows.len());
                for row in 0..rows.len() {
                    let location = rows
                        .cell(row, "location")
                        .ok_or_else(|| unexpected(self, "row without location"))?
                        .to_string();
                    let max_cases = rows
                        .cell(row, "max_cases")
                        .map(|v| v.parse::<f64>())
                        .transpose()
                        .map_err(|e| unexpected(self, &e.to_string()))?;
                    ranked.push(LocationCases {
                        location,
                        max_cases,
                    });
                }
                Ok(QualityOutcome::TopLocations { locations: ranked })
            }
        }
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn unexpected(query: &QualityQuery, detail: &str) -> IngestError {
    IngestError::UnexpectedRows(format!("{}: {}", query.name(), detail))
}

fn parse_date(query: &QualityQuery, value: Option<&str>) -> IngestResult<Option<NaiveDate>> {
    value
        .map(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d"))
        .transpose()
        .map_err(|e| unexpected(query, &e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordCount {
    pub count: u64,
}

/// Date bounds; `None` for an empty table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationCases {
    pub location: String,
    pub max_cases: Option<f64>,
}

/// Typed result of one quality query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum QualityOutcome {
    RecordCount(RecordCount),
    DateRange(DateRange),
    TopLocations { locations: Vec<LocationCases> },
}

impl fmt::Display for QualityOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityOutcome::RecordCount(c) => write!(f, "Total records: {}", c.count),
            QualityOutcome::DateRange(r) => write!(
                f,
                "Date range: {} to {}",
                display_date(r.min_date),
                display_date(r.max_date)
            ),
            QualityOutcome::TopLocations { locations } => {
                write!(f, "Top {} locations by cases:", locations.len())?;
                for (rank, entry) in locations.iter().enumerate() {
                    match entry.max_cases {
                        Some(cases) => write!(f, " {}. {} ({})", rank + 1, entry.location, cases)?,
                        None => write!(f, " {}. {} (n/a)", rank + 1, entry.location)?,
                    }
                }
                Ok(())
            }
        }
    }
}

fn display_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string())
        .unwrap_or_else(|| "n/a".to_string())
}

/// Outcome of a single check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: &'static str,
    pub outcome: Option<QualityOutcome>,
    pub error: Option<String>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Results of every check attempted in a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityReport {
    pub checks: Vec<CheckResult>,
}

impl QualityReport {
    pub fn failed_checks(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed()).count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed_checks() == 0
    }

    pub fn record_count(&self) -> Option<u64> {
        self.outcomes().find_map(|o| match o {
            QualityOutcome::RecordCount(c) => Some(c.count),
            _ => None,
        })
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.outcomes().find_map(|o| match o {
            QualityOutcome::DateRange(r) => Some(*r),
            _ => None,
        })
    }

    pub fn top_locations(&self) -> Option<&[LocationCases]> {
        self.outcomes().find_map(|o| match o {
            QualityOutcome::TopLocations { locations } => Some(locations.as_slice()),
            _ => None,
        })
    }

    fn outcomes(&self) -> impl Iterator<Item = &QualityOutcome> {
        self.checks.iter().filter_map(|c| c.outcome.as_ref())
    }
}

/// Run `queries` in order against `table`. Never fails; per-query errors
/// are recorded in the report.
pub async fn run_checks(
    warehouse: &dyn Warehouse,
    table: &TableId,
    queries: &[QualityQuery],
) -> QualityReport {
    let mut report = QualityReport::default();

    for query in queries {
        let result = match warehouse.run_quality_query(table, query).await {
            Ok(rows) => query.decode(&rows),
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                info!(check = query.name(), "{}", outcome);
                report.checks.push(CheckResult {
                    name: query.name(),
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(e) => {
                warn!(check = query.name(), "Quality check failed: {}", e);
                report.checks.push(CheckResult {
                    name: query.name(),
                    outcome: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableId {
        TableId::new("proj", "covid_staging", "raw_covid_data")
    }

    fn row_set(columns: &[&str], rows: Vec<Vec<Option<&str>>>) -> RowSet {
        RowSet::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(|c| c.map(str::to_string)).collect())
                .collect(),
        )
    }

    #[test]
    fn test_standard_checks_order() {
        let names: Vec<_> = QualityQuery::standard_checks()
            .iter()
            .map(QualityQuery::name)
            .collect();
        assert_eq!(
            names,
            vec!["total_records", "date_range", "top_locations_by_cases"]
        );
    }

    #[test]
    fn test_sql_text() {
        assert_eq!(
            QualityQuery::TotalRecords.sql(&table()),
            "SELECT COUNT(*) as count FROM `proj.covid_staging.raw_covid_data`"
        );

        let top = QualityQuery::top_locations(5).sql(&table());
        assert!(top.contains("WHERE location != 'World' AND continent IS NOT NULL"));
        assert!(top.contains("ORDER BY max_cases DESC"));
        assert!(top.ends_with("LIMIT 5"));
    }

    #[test]
    fn test_sql_escapes_excluded_location() {
        let query = QualityQuery::TopLocationsByCases {
            limit: 3,
            excluded_location: "Cote d'Ivoire".to_string(),
        };
        assert!(query.sql(&table()).contains("location != 'Cote d\\'Ivoire'"));
    }

    #[test]
    fn test_decode_count() {
        let rows = row_set(&["count"], vec![vec![Some("42")]]);
        let outcome = QualityQuery::TotalRecords.decode(&rows).unwrap();
        assert_eq!(outcome, QualityOutcome::RecordCount(RecordCount { count: 42 }));
        assert_eq!(outcome.to_string(), "Total records: 42");
    }

    #[test]
    fn test_decode_date_range_of_empty_table() {
        let rows = row_set(&["min_date", "max_date"], vec![vec![None, None]]);
        let outcome = QualityQuery::DateRange.decode(&rows).unwrap();
        assert_eq!(
            outcome,
            QualityOutcome::DateRange(DateRange {
                min_date: None,
                max_date: None
            })
        );
        assert_eq!(outcome.to_string(), "Date range: n/a to n/a");
    }

    #[test]
    fn test_decode_top_locations() {
        let rows = row_set(
            &["location", "max_cases"],
            vec![
                vec![Some("Afghanistan"), Some("100.0")],
                vec![Some("Albania"), Some("5.0E1")],
            ],
        );
        let outcome = QualityQuery::top_locations(5).decode(&rows).unwrap();
        let QualityOutcome::TopLocations { locations } = &outcome else {
            panic!("expected top locations");
        };
        assert_eq!(locations[0].location, "Afghanistan");
        assert_eq!(locations[0].max_cases, Some(100.0));
        assert_eq!(locations[1].max_cases, Some(50.0));
        assert_eq!(
            outcome.to_string(),
            "Top 2 locations by cases: 1. Afghanistan (100) 2. Albania (50)"
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let rows = row_set(&["count"], vec![vec![Some("many")]]);
        assert!(matches!(
            QualityQuery::TotalRecords.decode(&rows),
            Err(IngestError::UnexpectedRows(_))
        ));

        let empty = RowSet::default();
        assert!(QualityQuery::TotalRecords.decode(&empty).is_err());
        assert!(QualityQuery::DateRange.decode(&empty).is_err());
    }

    #[test]
    fn test_report_accessors() {
        let report = QualityReport {
            checks: vec![
                CheckResult {
                    name: "total_records",
                    outcome: Some(QualityOutcome::RecordCount(RecordCount { count: 3 })),
                    error: None,
                },
                CheckResult {
                    name: "date_range",
                    outcome: None,
                    error: Some("boom".to_string()),
                },
            ],
        };
        assert_eq!(report.record_count(), Some(3));
        assert_eq!(report.date_range(), None);
        assert_eq!(report.failed_checks(), 1);
        assert!(!report.all_passed());
    }
}

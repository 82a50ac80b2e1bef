//! In-memory CSV dataset
//!
//! The downloaded file is held as a header row plus string cells. Rows shorter
//! than the header are padded with empty cells; empty cells are nulls.

pub mod source;

pub use source::{DatasetSource, HttpDatasetSource};

use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::Read;

use crate::error::{IngestError, IngestResult};

pub const DATE_COLUMN: &str = "date";
pub const LOCATION_COLUMN: &str = "location";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parsed CSV table
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// Observability figures computed after download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub row_count: usize,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub distinct_locations: usize,
    pub null_values: usize,
}

impl Dataset {
    /// Build a dataset from headers and rows, padding short rows
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> IngestResult<Self> {
        let width = headers.len();
        let mut padded = Vec::with_capacity(rows.len());
        for (index, mut row) in rows.into_iter().enumerate() {
            if row.len() > width {
                return Err(IngestError::DatasetParse(format!(
                    "row {} has {} fields, header has {}",
                    index + 1,
                    row.len(),
                    width
                )));
            }
            row.resize(width, String::new());
            padded.push(row);
        }
        Ok(Self {
            headers,
            rows: padded,
        })
    }

    /// Parse CSV text with a header row.
    ///
    /// The `date` and `location` columns must be present.
    pub fn from_reader<R: Read>(reader: R) -> IngestResult<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| IngestError::DatasetParse(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if headers.is_empty() || headers.iter().all(String::is_empty) {
            return Err(IngestError::DatasetParse("missing header row".to_string()));
        }

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| IngestError::DatasetParse(e.to_string()))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        let dataset = Self::new(headers, rows)?;
        for required in [DATE_COLUMN, LOCATION_COLUMN] {
            if dataset.column_index(required).is_none() {
                return Err(IngestError::MissingColumn(required.to_string()));
            }
        }
        Ok(dataset)
    }

    pub fn from_bytes(bytes: &[u8]) -> IngestResult<Self> {
        Self::from_reader(bytes)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Iterate the cells of one column
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a str> + 'a> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row[index].as_str()))
    }

    /// Compute row count, date range, distinct locations and null count
    pub fn summary(&self) -> DatasetSummary {
        let mut min_date: Option<NaiveDate> = None;
        let mut max_date: Option<NaiveDate> = None;
        if let Some(dates) = self.column(DATE_COLUMN) {
            for date in dates.filter_map(|d| NaiveDate::parse_from_str(d.trim(), DATE_FORMAT).ok())
            {
                min_date = Some(min_date.map_or(date, |m| m.min(date)));
                max_date = Some(max_date.map_or(date, |m| m.max(date)));
            }
        }

        let distinct_locations = self
            .column(LOCATION_COLUMN)
            .map(|cells| {
                cells
                    .filter(|c| !c.is_empty())
                    .collect::<HashSet<_>>()
                    .len()
            })
            .unwrap_or(0);

        let null_values = self
            .rows
            .iter()
            .map(|row| row.iter().filter(|c| c.is_empty()).count())
            .sum();

        DatasetSummary {
            row_count: self.rows.len(),
            min_date,
            max_date,
            distinct_locations,
            null_values,
        }
    }

    /// Columns of `columns` that this dataset lacks
    pub fn missing_columns(&self, columns: &[String]) -> Vec<String> {
        columns
            .iter()
            .filter(|c| self.column_index(c).is_none())
            .cloned()
            .collect()
    }

    /// Reorder onto `columns`, dropping extra columns and leaving absent ones empty
    pub fn project(&self, columns: &[String]) -> Dataset {
        let indices: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indices
                    .iter()
                    .map(|index| index.map(|i| row[i].clone()).unwrap_or_default())
                    .collect()
            })
            .collect();

        Dataset {
            headers: columns.to_vec(),
            rows,
        }
    }

    /// Serialize back to CSV text with a header row
    pub fn to_csv(&self) -> IngestResult<Vec<u8>> {
        let encode = |e: csv::Error| IngestError::DatasetEncode(e.to_string());
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.headers).map_err(encode)?;
        for row in &self.rows {
            writer.write_record(row).map_err(encode)?;
        }
        writer
            .into_inner()
            .map_err(|e| IngestError::DatasetEncode(e.to_string()))
    }
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "n/a".into());
        write!(
            f,
            "{} records, dates {} to {}, {} locations, {} missing values",
            self.row_count,
            date(self.min_date),
            date(self.max_date),
            self.distinct_locations,
            self.null_values
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "iso_code,continent,location,date,total_cases,extra\n\
        AFG,Asia,Afghanistan,2020-02-24,5,x\n\
        AFG,Asia,Afghanistan,2021-03-01,100,\n\
        OWID_WRL,,World,2020-01-03,5000000,y\n\
        ALB,Europe,Albania,2022-12-31,50\n";

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_parse_pads_short_rows() {
        let dataset = Dataset::from_bytes(SAMPLE.as_bytes()).unwrap();
        assert_eq!(dataset.row_count(), 4);
        assert_eq!(dataset.headers().len(), 6);
        assert!(dataset.rows().iter().all(|r| r.len() == 6));
        assert_eq!(dataset.rows()[3][5], "");
    }

    #[test]
    fn test_summary_statistics() {
        let dataset = Dataset::from_bytes(SAMPLE.as_bytes()).unwrap();
        let summary = dataset.summary();

        assert_eq!(summary.row_count, 4);
        assert_eq!(summary.min_date, NaiveDate::from_ymd_opt(2020, 1, 3));
        assert_eq!(summary.max_date, NaiveDate::from_ymd_opt(2022, 12, 31));
        assert_eq!(summary.distinct_locations, 3);
        // empty extra on row 2, empty continent on row 3, padded extra on row 4
        assert_eq!(summary.null_values, 3);
    }

    #[test]
    fn test_summary_of_empty_dataset() {
        let dataset = Dataset::from_bytes(b"location,date\n").unwrap();
        let summary = dataset.summary();
        assert_eq!(summary.row_count, 0);
        assert_eq!(summary.min_date, None);
        assert_eq!(summary.max_date, None);
        assert_eq!(summary.distinct_locations, 0);
    }

    #[test]
    fn test_missing_required_column() {
        let result = Dataset::from_bytes(b"location,cases\nAfghanistan,1\n");
        assert!(matches!(result, Err(IngestError::MissingColumn(c)) if c == "date"));
    }

    #[test]
    fn test_too_many_fields_is_parse_error() {
        let result = Dataset::from_bytes(b"location,date\nAfghanistan,2020-01-01,oops\n");
        assert!(matches!(result, Err(IngestError::DatasetParse(_))));
    }

    #[test]
    fn test_quoted_newline_survives_round_trip() {
        let input = "location,date,note\nAlbania,2021-01-01,\"two\nlines\"\n";
        let dataset = Dataset::from_bytes(input.as_bytes()).unwrap();
        assert_eq!(dataset.rows()[0][2], "two\nlines");

        let reparsed = Dataset::from_bytes(&dataset.to_csv().unwrap()).unwrap();
        assert_eq!(reparsed, dataset);
    }

    #[test]
    fn test_project_onto_schema_columns() {
        let dataset = Dataset::from_bytes(SAMPLE.as_bytes()).unwrap();
        let columns = names(&["location", "date", "population"]);

        assert_eq!(dataset.missing_columns(&columns), names(&["population"]));

        let projected = dataset.project(&columns);
        assert_eq!(projected.headers(), columns.as_slice());
        assert_eq!(projected.rows()[0], names(&["Afghanistan", "2020-02-24", ""]));

        let csv = String::from_utf8(projected.to_csv().unwrap()).unwrap();
        assert!(csv.starts_with("location,date,population\n"));
        assert!(!csv.contains("extra"));
    }
}

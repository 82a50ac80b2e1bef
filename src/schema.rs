//! Target table schema

use serde::{Deserialize, Serialize};

/// Column type in the warehouse
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Date,
    Float,
}

/// Column mode in the warehouse
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Nullable,
    Required,
}

/// A single column definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    pub mode: FieldMode,
}

impl FieldSchema {
    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: FieldMode::Nullable,
        }
    }
}

/// Ordered list of columns
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }

    /// Column names in declared order
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Position of a column, if declared
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The fixed 12-column schema of the raw COVID table
pub fn covid_schema() -> TableSchema {
    use FieldType::{Date, Float, String};

    TableSchema::new(vec![
        FieldSchema::nullable("iso_code", String),
        FieldSchema::nullable("continent", String),
        FieldSchema::nullable("location", String),
        FieldSchema::nullable("date", Date),
        FieldSchema::nullable("total_cases", Float),
        FieldSchema::nullable("new_cases", Float),
        FieldSchema::nullable("total_deaths", Float),
        FieldSchema::nullable("new_deaths", Float),
        FieldSchema::nullable("total_vaccinations", Float),
        FieldSchema::nullable("people_vaccinated", Float),
        FieldSchema::nullable("people_fully_vaccinated", Float),
        FieldSchema::nullable("population", Float),
    ])
}

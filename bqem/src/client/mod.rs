//! Clients of BigQuery-compatible services.

mod base;
mod rest;

use std::fmt;
use std::str::FromStr;

pub use base::DatabaseClient;
pub use rest::BigQueryRestClient;

use crate::bail;
use crate::error::{BqemError, BqemResult, ErrorKind};
use crate::schema::TableSchema;

/// A row as a JSON object keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Fully qualified dataset name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetRef {
    pub project_id: String,
    pub dataset_id: String,
}

impl DatasetRef {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        }
    }

    /// Returns a reference to `table_id` inside this dataset.
    pub fn table(&self, table_id: impl Into<String>) -> TableRef {
        TableRef::new(&self.project_id, &self.dataset_id, table_id)
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project_id, self.dataset_id)
    }
}

/// Fully qualified table name, displayed as `project.dataset.table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    pub fn dataset(&self) -> DatasetRef {
        DatasetRef::new(&self.project_id, &self.dataset_id)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

impl FromStr for TableRef {
    type Err = BqemError;

    /// Parses `project.dataset.table`. Every segment must be non-empty.
    fn from_str(path: &str) -> BqemResult<Self> {
        let segments: Vec<&str> = path.split('.').collect();

        match segments.as_slice() {
            [project_id, dataset_id, table_id]
                if [project_id, dataset_id, table_id]
                    .iter()
                    .all(|segment| !segment.is_empty()) =>
            {
                Ok(TableRef::new(*project_id, *dataset_id, *table_id))
            }
            _ => bail!(
                ErrorKind::InvalidTablePath,
                "Table path must have the form project.dataset.table",
                path
            ),
        }
    }
}

/// Table metadata returned by [`DatabaseClient::get_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub reference: TableRef,
    pub schema: TableSchema,
}

/// Result of [`DatabaseClient::query`].
///
/// Rows are JSON objects keyed by column name; record columns are nested objects and repeated
/// columns are arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub schema: TableSchema,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

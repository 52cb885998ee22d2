use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::bail;
use crate::client::{DatabaseClient, DatasetRef, QueryResult, Row, Table, TableRef};
use crate::error::{BqemResult, ErrorKind};
use crate::schema::TableSchema;

#[derive(Debug, Default)]
struct Inner {
    datasets: HashSet<DatasetRef>,
    tables: HashMap<TableRef, TableSchema>,
    rows: HashMap<TableRef, Vec<Row>>,
    get_table_calls: HashMap<TableRef, usize>,
    create_dataset_calls: Vec<DatasetRef>,
    create_table_calls: Vec<(TableRef, TableSchema)>,
    insert_calls: usize,
    queries: Vec<String>,
    query_result: QueryResult,
}

/// In-memory [`DatabaseClient`] recording every call.
///
/// Tables added with [`MemoryClient::add_table`] are served by `get_table`, which makes the
/// client usable as a remote schema source. Creating a table requires its dataset, like a real
/// service. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an existing table, creating its dataset.
    pub async fn add_table(&self, project_id: &str, dataset_id: &str, table_id: &str, schema: TableSchema) {
        let mut inner = self.inner.lock().await;
        let table = TableRef::new(project_id, dataset_id, table_id);

        inner.datasets.insert(table.dataset());
        inner.tables.insert(table, schema);
    }

    /// Sets the result returned by every subsequent query.
    pub async fn set_query_result(&self, result: QueryResult) {
        self.inner.lock().await.query_result = result;
    }

    /// Returns how often `get_table` was called for `project.dataset.table`.
    pub async fn get_table_calls(&self, path: &str) -> usize {
        let Ok(table) = path.parse::<TableRef>() else {
            return 0;
        };

        self.inner
            .lock()
            .await
            .get_table_calls
            .get(&table)
            .copied()
            .unwrap_or(0)
    }

    pub async fn create_dataset_calls(&self) -> Vec<DatasetRef> {
        self.inner.lock().await.create_dataset_calls.clone()
    }

    pub async fn create_table_calls(&self) -> Vec<(TableRef, TableSchema)> {
        self.inner.lock().await.create_table_calls.clone()
    }

    pub async fn insert_calls(&self) -> usize {
        self.inner.lock().await.insert_calls
    }

    /// Returns all rows inserted into `table`, in insertion order.
    pub async fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.inner
            .lock()
            .await
            .rows
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn queries(&self) -> Vec<String> {
        self.inner.lock().await.queries.clone()
    }
}

impl DatabaseClient for MemoryClient {
    async fn get_table(&self, table: &TableRef) -> BqemResult<Table> {
        let mut inner = self.inner.lock().await;
        *inner.get_table_calls.entry(table.clone()).or_default() += 1;

        let Some(schema) = inner.tables.get(table) else {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        };

        Ok(Table {
            reference: table.clone(),
            schema: schema.clone(),
        })
    }

    async fn create_dataset(&self, dataset: &DatasetRef) -> BqemResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.create_dataset_calls.push(dataset.clone());

        Ok(inner.datasets.insert(dataset.clone()))
    }

    async fn create_table(&self, table: &TableRef, schema: &TableSchema) -> BqemResult<bool> {
        let mut inner = self.inner.lock().await;
        inner
            .create_table_calls
            .push((table.clone(), schema.clone()));

        if !inner.datasets.contains(&table.dataset()) {
            bail!(
                ErrorKind::ClientResponseError,
                "Dataset does not exist",
                table.dataset()
            );
        }

        if inner.tables.contains_key(table) {
            return Ok(false);
        }
        inner.tables.insert(table.clone(), schema.clone());

        Ok(true)
    }

    async fn insert_rows(&self, table: &TableRef, rows: &[Row]) -> BqemResult<()> {
        let mut inner = self.inner.lock().await;
        inner.insert_calls += 1;

        if !inner.tables.contains_key(table) {
            bail!(ErrorKind::TableNotFound, "Table does not exist", table);
        }
        inner
            .rows
            .entry(table.clone())
            .or_default()
            .extend_from_slice(rows);

        Ok(())
    }

    async fn query(&self, _project_id: &str, sql: &str) -> BqemResult<QueryResult> {
        let mut inner = self.inner.lock().await;
        inner.queries.push(sql.to_owned());

        Ok(inner.query_result.clone())
    }
}

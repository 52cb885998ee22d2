use std::future::Future;

use crate::client::{DatasetRef, QueryResult, Row, Table, TableRef};
use crate::error::BqemResult;
use crate::schema::TableSchema;

/// Capability interface of a BigQuery-compatible service.
///
/// [`DatabaseClient`] is implemented by [`crate::client::BigQueryRestClient`], which talks to
/// either a local emulator or production BigQuery, and by in-memory doubles used in tests. The
/// [`crate::manager::Manager`] uses one instance against the emulator, and the
/// [`crate::schema::SchemaResolver`] optionally uses another one as its remote schema source.
///
/// Errors are reported with the kinds documented on each method and are propagated by callers
/// without being wrapped.
pub trait DatabaseClient {
    /// Fetches the metadata of a table, including its schema.
    ///
    /// Fails with [`crate::error::ErrorKind::TableNotFound`] when the table does not exist.
    fn get_table(&self, table: &TableRef) -> impl Future<Output = BqemResult<Table>> + Send;

    /// Creates a dataset.
    ///
    /// Returns `true` when the dataset was created and `false` when it already existed.
    fn create_dataset(&self, dataset: &DatasetRef) -> impl Future<Output = BqemResult<bool>> + Send;

    /// Creates a table with the given schema.
    ///
    /// Returns `true` when the table was created and `false` when it already existed.
    fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
    ) -> impl Future<Output = BqemResult<bool>> + Send;

    /// Streams rows into an existing table.
    ///
    /// Fails with [`crate::error::ErrorKind::InsertRowsFailed`] when any row is rejected.
    fn insert_rows(
        &self,
        table: &TableRef,
        rows: &[Row],
    ) -> impl Future<Output = BqemResult<()>> + Send;

    /// Runs a query in the given project and waits for all of its result rows.
    fn query(
        &self,
        project_id: &str,
        sql: &str,
    ) -> impl Future<Output = BqemResult<QueryResult>> + Send;
}

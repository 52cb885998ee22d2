use tracing::{debug, info};

use crate::bail;
use crate::client::{DatabaseClient, TableRef};
use crate::error::{BqemResult, ErrorKind};
use crate::schema::{SchemaStore, TableSchema};

/// Resolves table schemas from the [`SchemaStore`], falling back to a remote schema source.
///
/// Remote lookups are lazy and memoized: a schema fetched once is merged into the store, so
/// later resolutions of the same table never reach the remote client again.
#[derive(Debug)]
pub struct SchemaResolver<R> {
    store: SchemaStore,
    remote: Option<R>,
}

impl<R> SchemaResolver<R>
where
    R: DatabaseClient,
{
    /// Creates a resolver. Without a remote client only cached schemas can be resolved.
    pub fn new(store: SchemaStore, remote: Option<R>) -> Self {
        Self { store, remote }
    }

    /// Returns the schema of `project_id.dataset_id.table_id`.
    ///
    /// Fails with [`ErrorKind::SchemaNotFound`] when the table is not cached and either no remote
    /// client is configured or the remote table has no columns. Errors of the remote client are
    /// returned unchanged.
    pub async fn resolve(
        &mut self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
    ) -> BqemResult<TableSchema> {
        if let Some(schema) = self.store.lookup(project_id, dataset_id, table_id) {
            debug!(project_id, dataset_id, table_id, "schema resolved from cache");
            return Ok(schema.clone());
        }

        let table = TableRef::new(project_id, dataset_id, table_id);

        let Some(remote) = &self.remote else {
            bail!(
                ErrorKind::SchemaNotFound,
                "Schema is not cached and no remote schema source is configured",
                table.to_string()
            );
        };

        let fetched = remote.get_table(&table).await?;
        if fetched.schema.is_empty() {
            bail!(
                ErrorKind::SchemaNotFound,
                "Remote table has no columns",
                table.to_string()
            );
        }

        info!(%table, fields = fetched.schema.len(), "schema fetched from remote source");
        self.store
            .merge(project_id, dataset_id, table_id, fetched.schema.clone());

        Ok(fetched.schema)
    }

    /// Writes the schema cache if any remote schema has been merged.
    pub fn flush(&self) -> BqemResult<bool> {
        self.store.flush()
    }

    pub fn store(&self) -> &SchemaStore {
        &self.store
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::schema::{FieldType, SchemaField};
    use crate::test_utils::MemoryClient;

    fn users_schema() -> TableSchema {
        TableSchema::new(vec![
            SchemaField::new("id", FieldType::Integer),
            SchemaField::new("email", FieldType::String),
        ])
    }

    #[tokio::test]
    async fn uncached_table_without_remote_is_not_found() {
        let mut resolver: SchemaResolver<MemoryClient> =
            SchemaResolver::new(SchemaStore::load(None).unwrap(), None);

        let err = resolver.resolve("p", "d", "t").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaNotFound);
        assert_eq!(err.detail(), Some("p.d.t"));
    }

    #[tokio::test]
    async fn cached_schema_is_returned_without_a_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        fs::write(
            &path,
            "p:\n  d:\n    t:\n    - name: id\n      type: INTEGER\n      mode: NULLABLE\n",
        )
        .unwrap();

        let mut resolver: SchemaResolver<MemoryClient> =
            SchemaResolver::new(SchemaStore::load(Some(path)).unwrap(), None);

        let schema = resolver.resolve("p", "d", "t").await.unwrap();

        assert_eq!(
            schema,
            TableSchema::new(vec![SchemaField::new("id", FieldType::Integer)])
        );
        assert!(!resolver.store().is_dirty());
    }

    #[tokio::test]
    async fn cached_schema_does_not_reach_the_remote() {
        let remote = MemoryClient::new();
        remote.add_table("p", "d", "t", users_schema()).await;

        let mut cache = crate::schema::SchemaCache::new();
        cache.merge("p", "d", "t", users_schema());
        let mut resolver = SchemaResolver::new(SchemaStore::in_memory(cache), Some(remote.clone()));

        resolver.resolve("p", "d", "t").await.unwrap();

        assert_eq!(remote.get_table_calls("p.d.t").await, 0);
    }

    #[tokio::test]
    async fn remote_schema_is_fetched_once_and_cached() {
        let remote = MemoryClient::new();
        remote.add_table("p", "d", "t", users_schema()).await;
        let mut resolver = SchemaResolver::new(SchemaStore::load(None).unwrap(), Some(remote.clone()));

        for _ in 0..3 {
            assert_eq!(resolver.resolve("p", "d", "t").await.unwrap(), users_schema());
        }

        assert_eq!(remote.get_table_calls("p.d.t").await, 1);
        assert!(resolver.store().is_dirty());
        assert_eq!(resolver.store().lookup("p", "d", "t"), Some(&users_schema()));
    }

    #[tokio::test]
    async fn remote_errors_are_returned_unchanged() {
        let remote = MemoryClient::new();
        let mut resolver = SchemaResolver::new(SchemaStore::load(None).unwrap(), Some(remote));

        let err = resolver.resolve("p", "d", "missing").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TableNotFound);
        assert!(!resolver.store().is_dirty());
    }

    #[tokio::test]
    async fn empty_remote_schema_is_not_cached() {
        let remote = MemoryClient::new();
        remote.add_table("p", "d", "t", TableSchema::default()).await;
        let mut resolver = SchemaResolver::new(SchemaStore::load(None).unwrap(), Some(remote.clone()));

        let err = resolver.resolve("p", "d", "t").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaNotFound);
        assert!(resolver.store().cache().is_empty());
        assert!(!resolver.store().is_dirty());
    }

    #[tokio::test]
    async fn fetched_schemas_survive_a_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        let remote = MemoryClient::new();
        remote.add_table("p", "d", "t", users_schema()).await;

        let mut resolver =
            SchemaResolver::new(SchemaStore::load(Some(path.clone())).unwrap(), Some(remote));
        resolver.resolve("p", "d", "t").await.unwrap();
        assert!(resolver.flush().unwrap());

        let mut offline: SchemaResolver<MemoryClient> =
            SchemaResolver::new(SchemaStore::load(Some(path)).unwrap(), None);
        assert_eq!(offline.resolve("p", "d", "t").await.unwrap(), users_schema());
    }
}

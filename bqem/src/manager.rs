//! Composition of the emulator, its client and the schema resolver.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use config::shared::ManagerConfig;
use tracing::{debug, error, info, warn};

use crate::client::{BigQueryRestClient, DatabaseClient, DatasetRef, QueryResult, Row, TableRef};
use crate::emulator::{PortAllocator, PortPair, ProcessSupervisor, SupervisorConfig, is_port_bound};
use crate::error::{BqemResult, ErrorKind};
use crate::schema::{SchemaResolver, SchemaStore, TableSchema};
use crate::{bail, bqem_error};

/// Where [`Manager::create_table`] takes a table schema from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSchemaSource {
    /// Use this schema as is.
    Provided(TableSchema),
    /// Resolve the schema through the schema cache and the remote schema source.
    Resolve,
}

impl From<TableSchema> for TableSchemaSource {
    fn from(schema: TableSchema) -> Self {
        TableSchemaSource::Provided(schema)
    }
}

/// Datasets and tables created in the emulator by one [`Manager`].
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: HashMap<String, HashSet<String>>,
}

impl DatasetRegistry {
    pub fn contains_dataset(&self, dataset_id: &str) -> bool {
        self.datasets.contains_key(dataset_id)
    }

    pub fn contains_table(&self, dataset_id: &str, table_id: &str) -> bool {
        self.datasets
            .get(dataset_id)
            .is_some_and(|tables| tables.contains(table_id))
    }

    /// Returns the known tables of `dataset_id`, or `None` if the dataset is unknown.
    pub fn tables(&self, dataset_id: &str) -> Option<&HashSet<String>> {
        self.datasets.get(dataset_id)
    }

    pub fn datasets(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    fn add_dataset(&mut self, dataset_id: &str) {
        self.datasets.entry(dataset_id.to_owned()).or_default();
    }

    fn add_table(&mut self, dataset_id: &str, table_id: &str) {
        self.datasets
            .entry(dataset_id.to_owned())
            .or_default()
            .insert(table_id.to_owned());
    }
}

/// A running emulator with a connected client and lazily resolved table schemas.
///
/// Obtain one through [`with_manager`] or [`Manager::run`] so that [`Manager::shutdown`] runs on
/// every exit path. Shutting down stops the emulator and writes newly fetched schemas to the
/// cache file. Dropping a manager that was not shut down does the same on a best effort basis.
#[derive(Debug)]
pub struct Manager<C = BigQueryRestClient, R = BigQueryRestClient>
where
    C: DatabaseClient,
    R: DatabaseClient,
{
    project_id: String,
    emulator: Option<ProcessSupervisor>,
    client: C,
    resolver: SchemaResolver<R>,
    registry: DatasetRegistry,
    shut_down: bool,
}

impl Manager {
    /// Starts a manager from configuration.
    ///
    /// Unless `launch_emulator` is false, an emulator is launched on the first free port pair at
    /// or above `port`/`grpc_port`. Otherwise an emulator is expected to listen on `port`.
    pub async fn start(config: ManagerConfig) -> BqemResult<Manager> {
        config.validate().map_err(|err| {
            bqem_error!(
                ErrorKind::ConfigError,
                "Invalid manager configuration",
                err.to_string(),
                source: err
            )
        })?;

        let store = SchemaStore::load(config.schema_path.clone())?;
        let remote = if config.remote.enabled {
            Some(BigQueryRestClient::new(
                config.remote.endpoint.clone(),
                config.remote.access_token.clone(),
            )?)
        } else {
            None
        };
        let resolver = SchemaResolver::new(store, remote);

        let emulator = if config.launch_emulator {
            let allocator = PortAllocator::new(
                SupervisorConfig::from_manager_config(&config),
                config.port,
                config.grpc_port,
                config.max_port_attempts,
            );

            Some(allocator.acquire().await?)
        } else {
            if !is_port_bound(config.port).await {
                warn!(port = config.port, "no emulator is listening on the configured port");
            }

            None
        };

        let data_port = emulator
            .as_ref()
            .map_or(config.port, |emulator| emulator.ports().data_port);
        let client = BigQueryRestClient::for_emulator(data_port)?
            .with_query_timeout(Duration::from_millis(config.emulator.query_timeout_ms));

        info!(
            project_id = %config.project,
            port = data_port,
            launched = emulator.is_some(),
            "emulator manager started"
        );

        Ok(Manager::from_parts(config.project, emulator, client, resolver))
    }
}

impl<C, R> Manager<C, R>
where
    C: DatabaseClient,
    R: DatabaseClient,
{
    /// Assembles a manager from already constructed parts.
    ///
    /// `emulator` is `None` when the emulator is not owned by this manager.
    pub fn from_parts(
        project_id: impl Into<String>,
        emulator: Option<ProcessSupervisor>,
        client: C,
        resolver: SchemaResolver<R>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            emulator,
            client,
            resolver,
            registry: DatasetRegistry::default(),
            shut_down: false,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Returns the ports of the owned emulator, or `None` for an external emulator.
    pub fn ports(&self) -> Option<PortPair> {
        self.emulator.as_ref().map(ProcessSupervisor::ports)
    }

    pub fn emulator(&self) -> Option<&ProcessSupervisor> {
        self.emulator.as_ref()
    }

    pub fn datasets(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn resolver(&self) -> &SchemaResolver<R> {
        &self.resolver
    }

    /// Creates a dataset in the emulator. An existing dataset is not an error.
    pub async fn create_dataset(&mut self, dataset_id: &str) -> BqemResult<()> {
        self.client
            .create_dataset(&DatasetRef::new(&self.project_id, dataset_id))
            .await?;
        self.registry.add_dataset(dataset_id);

        Ok(())
    }

    /// Creates a table in the emulator, creating its dataset first when this manager has not
    /// created it yet. An existing table is not an error.
    ///
    /// With [`TableSchemaSource::Resolve`] a schema that is neither cached nor available
    /// remotely fails with [`ErrorKind::SchemaMissing`].
    pub async fn create_table(
        &mut self,
        dataset_id: &str,
        table_id: &str,
        source: TableSchemaSource,
    ) -> BqemResult<()> {
        if !self.registry.contains_dataset(dataset_id) {
            self.create_dataset(dataset_id).await?;
        }

        let schema = match source {
            TableSchemaSource::Provided(schema) => schema,
            TableSchemaSource::Resolve => self
                .resolver
                .resolve(&self.project_id, dataset_id, table_id)
                .await
                .map_err(|err| {
                    if err.kind() == ErrorKind::SchemaNotFound {
                        bqem_error!(
                            ErrorKind::SchemaMissing,
                            "No schema available for table",
                            format!("{}.{dataset_id}.{table_id}", self.project_id),
                            source: err
                        )
                    } else {
                        err
                    }
                })?,
        };

        let table = TableRef::new(&self.project_id, dataset_id, table_id);
        self.client.create_table(&table, &schema).await?;
        self.registry.add_table(dataset_id, table_id);

        Ok(())
    }

    /// Inserts rows into `dataset.table`, creating the dataset and the table with a resolved
    /// schema on first use.
    pub async fn load(&mut self, rows: Vec<Row>, path: &str) -> BqemResult<()> {
        let (dataset_id, table_id) = split_table_path(path)?;

        if !self.registry.contains_table(dataset_id, table_id) {
            self.create_table(dataset_id, table_id, TableSchemaSource::Resolve)
                .await?;
        }

        if rows.is_empty() {
            debug!(path, "no rows to load");
            return Ok(());
        }

        let table = TableRef::new(&self.project_id, dataset_id, table_id);
        self.client.insert_rows(&table, &rows).await?;
        debug!(%table, rows = rows.len(), "rows loaded");

        Ok(())
    }

    /// Runs `sql` against the emulator.
    pub async fn query(&self, sql: &str) -> BqemResult<QueryResult> {
        self.client.query(&self.project_id, sql).await
    }

    /// Runs `f` with this manager and shuts the manager down afterwards, whatever `f` returned.
    pub async fn run<F, T>(mut self, f: F) -> BqemResult<T>
    where
        F: AsyncFnOnce(&mut Self) -> BqemResult<T>,
    {
        let result = f(&mut self).await;
        self.shutdown().await;

        result
    }

    /// Stops the owned emulator and writes newly fetched schemas to the cache file.
    ///
    /// Idempotent. Failures are logged and never returned, so shutting down cannot mask the
    /// outcome of the work done with the manager.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Some(emulator) = self.emulator.as_mut() {
            emulator.stop().await;
        }

        self.flush_schemas();
        info!(project_id = %self.project_id, "emulator manager shut down");
    }

    fn flush_schemas(&self) {
        match self.resolver.flush() {
            Ok(true) => info!("schema cache updated"),
            Ok(false) => {}
            Err(err) => error!(error = %err, "writing the schema cache failed"),
        }
    }
}

impl<C, R> Drop for Manager<C, R>
where
    C: DatabaseClient,
    R: DatabaseClient,
{
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }

        warn!(
            project_id = %self.project_id,
            "emulator manager dropped without shutdown, cleaning up"
        );
        self.flush_schemas();
        // The supervisor kills the emulator when it is dropped.
    }
}

/// Starts a [`Manager`] from `config`, runs `f` with it and shuts it down afterwards.
pub async fn with_manager<F, T>(config: ManagerConfig, f: F) -> BqemResult<T>
where
    F: AsyncFnOnce(&mut Manager) -> BqemResult<T>,
{
    Manager::start(config).await?.run(f).await
}

/// Splits `dataset.table` into its two segments.
fn split_table_path(path: &str) -> BqemResult<(&str, &str)> {
    match path.split_once('.') {
        Some((dataset_id, table_id))
            if !dataset_id.is_empty() && !table_id.is_empty() && !table_id.contains('.') =>
        {
            Ok((dataset_id, table_id))
        }
        _ => bail!(
            ErrorKind::InvalidTablePath,
            "Table path must have the form dataset.table",
            path
        ),
    }
}

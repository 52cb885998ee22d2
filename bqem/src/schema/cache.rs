use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::schema::TableSchema;

/// Tables of one dataset, keyed by table id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetSchemas {
    tables: BTreeMap<String, TableSchema>,
}

impl DatasetSchemas {
    pub fn table(&self, table_id: &str) -> Option<&TableSchema> {
        self.tables.get(table_id).filter(|schema| !schema.is_empty())
    }

    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables
            .iter()
            .map(|(table_id, schema)| (table_id.as_str(), schema))
    }

    fn insert(&mut self, table_id: &str, schema: TableSchema) {
        self.tables.insert(table_id.to_owned(), schema);
    }

    fn prune(&mut self) {
        self.tables.retain(|_, schema| !schema.is_empty());
    }

    fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Datasets of one project, keyed by dataset id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectSchemas {
    datasets: BTreeMap<String, DatasetSchemas>,
}

impl ProjectSchemas {
    pub fn dataset(&self, dataset_id: &str) -> Option<&DatasetSchemas> {
        self.datasets.get(dataset_id)
    }

    pub fn datasets(&self) -> impl Iterator<Item = (&str, &DatasetSchemas)> {
        self.datasets
            .iter()
            .map(|(dataset_id, dataset)| (dataset_id.as_str(), dataset))
    }

    fn dataset_mut(&mut self, dataset_id: &str) -> &mut DatasetSchemas {
        self.datasets.entry(dataset_id.to_owned()).or_default()
    }

    fn prune(&mut self) {
        for dataset in self.datasets.values_mut() {
            dataset.prune();
        }
        self.datasets.retain(|_, dataset| !dataset.is_empty());
    }

    fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// In-memory schema cache: project id → dataset id → table id → [`TableSchema`].
///
/// Empty table schemas are never stored. An empty schema means "not resolved yet", so
/// [`SchemaCache::lookup`] reports it as absent and [`SchemaCache::merge`] refuses it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaCache {
    projects: BTreeMap<String, ProjectSchemas>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached schema of `project_id.dataset_id.table_id`.
    pub fn lookup(&self, project_id: &str, dataset_id: &str, table_id: &str) -> Option<&TableSchema> {
        self.projects
            .get(project_id)?
            .dataset(dataset_id)?
            .table(table_id)
    }

    /// Writes `schema` at `project_id.dataset_id.table_id`, creating the project and dataset
    /// levels when missing.
    ///
    /// Sibling projects, datasets and tables are left untouched; only the terminal table entry
    /// is replaced. Returns `false` without modifying the cache when `schema` is empty.
    pub fn merge(
        &mut self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        schema: TableSchema,
    ) -> bool {
        if schema.is_empty() {
            return false;
        }

        self.projects
            .entry(project_id.to_owned())
            .or_default()
            .dataset_mut(dataset_id)
            .insert(table_id, schema);

        true
    }

    pub fn project(&self, project_id: &str) -> Option<&ProjectSchemas> {
        self.projects.get(project_id)
    }

    pub fn projects(&self) -> impl Iterator<Item = (&str, &ProjectSchemas)> {
        self.projects
            .iter()
            .map(|(project_id, project)| (project_id.as_str(), project))
    }

    /// Returns the number of cached table schemas across all projects.
    pub fn table_count(&self) -> usize {
        self.projects
            .values()
            .flat_map(|project| project.datasets.values())
            .map(|dataset| dataset.tables.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Drops empty table schemas and the levels they leave empty.
    pub(crate) fn prune(&mut self) {
        for project in self.projects.values_mut() {
            project.prune();
        }
        self.projects.retain(|_, project| !project.is_empty());
    }
}

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::bqem_error;
use crate::error::{BqemResult, ErrorKind};
use crate::schema::{SchemaCache, TableSchema};

/// First line of every cache file written by [`YamlCodec`].
pub const PROVENANCE_HEADER: &str =
    "# This file is generated from BigQuery table metadata by \"bqem\"; DO NOT EDIT.";

/// Converts a [`SchemaCache`] to and from its on-disk representation.
///
/// Implementations must round-trip the three-level mapping and every attribute of
/// [`crate::schema::SchemaField`], including nested fields.
pub trait SchemaCodec {
    /// Encodes the whole cache, including any provenance marker the format supports.
    fn encode(&self, cache: &SchemaCache) -> BqemResult<String>;

    /// Decodes a cache from file contents.
    fn decode(&self, contents: &str) -> BqemResult<SchemaCache>;
}

/// YAML cache file format.
///
/// A file holding only comments, a document marker, or `null` decodes to an empty cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl SchemaCodec for YamlCodec {
    fn encode(&self, cache: &SchemaCache) -> BqemResult<String> {
        let body = serde_yaml::to_string(cache).map_err(|err| {
            bqem_error!(
                ErrorKind::SerializationError,
                "Schema cache could not be encoded as YAML",
                err.to_string(),
                source: err
            )
        })?;

        Ok(format!("{PROVENANCE_HEADER}\n{body}"))
    }

    fn decode(&self, contents: &str) -> BqemResult<SchemaCache> {
        let has_content = contents.lines().map(str::trim).any(|line| {
            !line.is_empty() && !line.starts_with('#') && line != "---"
        });
        if !has_content {
            return Ok(SchemaCache::new());
        }

        let cache: Option<SchemaCache> = serde_yaml::from_str(contents)?;

        Ok(cache.unwrap_or_default())
    }
}

/// Durable schema cache backed by a file.
///
/// The store is dirty once a remotely fetched schema has been merged and stays dirty for its
/// whole lifetime; [`SchemaStore::flush`] only writes a dirty store.
pub struct SchemaStore {
    path: Option<PathBuf>,
    codec: Box<dyn SchemaCodec + Send + Sync>,
    cache: SchemaCache,
    dirty: bool,
}

impl SchemaStore {
    /// Loads the YAML cache at `path`.
    ///
    /// A missing file, or no path at all, yields an empty cache.
    pub fn load(path: Option<PathBuf>) -> BqemResult<SchemaStore> {
        Self::load_with_codec(path, YamlCodec)
    }

    /// Loads the cache at `path` using `codec` for decoding and later encoding.
    pub fn load_with_codec<C>(path: Option<PathBuf>, codec: C) -> BqemResult<SchemaStore>
    where
        C: SchemaCodec + Send + Sync + 'static,
    {
        let mut cache = match path.as_deref() {
            Some(path) if path.is_file() => Self::read_cache(path, &codec)?,
            Some(path) => {
                debug!(path = %path.display(), "no schema cache file found, starting empty");
                SchemaCache::new()
            }
            None => SchemaCache::new(),
        };
        cache.prune();

        Ok(SchemaStore {
            path,
            codec: Box::new(codec),
            cache,
            dirty: false,
        })
    }

    /// Creates a store that is never persisted.
    pub fn in_memory(cache: SchemaCache) -> SchemaStore {
        let mut cache = cache;
        cache.prune();

        SchemaStore {
            path: None,
            codec: Box::new(YamlCodec),
            cache,
            dirty: false,
        }
    }

    pub fn lookup(&self, project_id: &str, dataset_id: &str, table_id: &str) -> Option<&TableSchema> {
        self.cache.lookup(project_id, dataset_id, table_id)
    }

    /// Merges a schema into the cache and marks the store dirty.
    ///
    /// Empty schemas are ignored and leave the dirty flag unchanged.
    pub fn merge(
        &mut self,
        project_id: &str,
        dataset_id: &str,
        table_id: &str,
        schema: TableSchema,
    ) -> bool {
        let merged = self.cache.merge(project_id, dataset_id, table_id, schema);
        self.dirty |= merged;

        merged
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the cache to its file if the store is dirty and has a path.
    ///
    /// The file is replaced atomically: the cache is written to a temporary file in the target
    /// directory which is then renamed over the destination. An existing file keeps its
    /// permissions; a new one gets the umask-restricted default of a regular file. Returns
    /// whether a file was written.
    pub fn flush(&self) -> BqemResult<bool> {
        let Some(path) = self.path.as_deref() else {
            return Ok(false);
        };

        if !self.dirty {
            debug!(path = %path.display(), "schema cache unchanged, skipping write");
            return Ok(false);
        }

        let encoded = self.codec.encode(&self.cache)?;

        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(directory)?;

        let mut file = create_temp_file(directory)?;
        file.write_all(encoded.as_bytes())?;
        // The rename replaces the file, so an existing cache keeps its mode only if copied.
        if let Ok(metadata) = fs::metadata(path) {
            file.as_file().set_permissions(metadata.permissions())?;
        }
        file.as_file().sync_all()?;
        file.persist(path)?;

        info!(
            path = %path.display(),
            tables = self.cache.table_count(),
            "schema cache written"
        );

        Ok(true)
    }

    fn read_cache(path: &Path, codec: &dyn SchemaCodec) -> BqemResult<SchemaCache> {
        let contents = fs::read_to_string(path)?;

        let cache = codec.decode(&contents).map_err(|err| {
            bqem_error!(
                ErrorKind::DeserializationError,
                "Schema cache file could not be decoded",
                format!("{}: {err}", path.display()),
                source: err
            )
        })?;

        info!(
            path = %path.display(),
            tables = cache.table_count(),
            "schema cache loaded"
        );

        Ok(cache)
    }
}

impl fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaStore")
            .field("path", &self.path)
            .field("tables", &self.cache.table_count())
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Creates the temporary file a flush writes into.
///
/// Temporary files are owner-only by default, which would leak onto the cache file on rename.
#[cfg(unix)]
fn create_temp_file(directory: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;

    tempfile::Builder::new()
        .permissions(fs::Permissions::from_mode(0o666))
        .tempfile_in(directory)
}

#[cfg(not(unix))]
fn create_temp_file(directory: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    tempfile::NamedTempFile::new_in(directory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldMode, FieldType, PolicyTags, SchemaField};

    fn users_schema() -> TableSchema {
        TableSchema::new(vec![
            SchemaField::new("id", FieldType::Integer),
            SchemaField::new("name", FieldType::String),
        ])
    }

    fn nested_schema() -> TableSchema {
        TableSchema::new(vec![
            SchemaField::new("id", FieldType::Integer).with_mode(FieldMode::Required),
            SchemaField::record(
                "addresses",
                vec![
                    SchemaField::new("city", FieldType::String).with_description("city name"),
                    SchemaField::record(
                        "geo",
                        vec![
                            SchemaField::new("lat", FieldType::Float),
                            SchemaField::new("lng", FieldType::Float),
                        ],
                    ),
                ],
            )
            .with_mode(FieldMode::Repeated),
            SchemaField::new("tags", FieldType::String).with_mode(FieldMode::Repeated),
        ])
    }

    #[test]
    fn missing_file_loads_empty_cache() {
        let dir = tempfile::tempdir().unwrap();

        let store = SchemaStore::load(Some(dir.path().join("absent.yaml"))).unwrap();

        assert!(store.cache().is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn unset_path_loads_empty_cache_and_never_writes() {
        let mut store = SchemaStore::load(None).unwrap();
        store.merge("p", "d", "t", users_schema());

        assert!(store.is_dirty());
        assert!(!store.flush().unwrap());
    }

    #[test]
    fn hand_written_file_without_modes_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        fs::write(
            &path,
            "---\nproject:\n  dataset:\n    table:\n      - name: id\n        type: INTEGER\n      - name: name\n        type: STRING\n",
        )
        .unwrap();

        let store = SchemaStore::load(Some(path)).unwrap();

        assert_eq!(
            store.lookup("project", "dataset", "table"),
            Some(&users_schema())
        );
    }

    #[test]
    fn comment_only_file_is_an_empty_cache() {
        let decoded = YamlCodec.decode(&format!("{PROVENANCE_HEADER}\n---\n")).unwrap();

        assert!(decoded.is_empty());
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "p:\n  d:\n    t:\n      - name: id\n        type: NOPE\n").unwrap();

        let err = SchemaStore::load(Some(path)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DeserializationError);
        assert!(err.detail().unwrap().contains("broken.yaml"));
    }

    #[test]
    fn clean_store_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");

        let store = SchemaStore::load(Some(path.clone())).unwrap();

        assert!(!store.flush().unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn flush_then_load_round_trips_nested_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("schema.yaml");

        let mut store = SchemaStore::load(Some(path.clone())).unwrap();
        store.merge("p", "d", "t", nested_schema());
        assert!(store.flush().unwrap());

        let reloaded = SchemaStore::load(Some(path)).unwrap();
        assert_eq!(reloaded.lookup("p", "d", "t"), Some(&nested_schema()));
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn flush_keeps_entries_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        fs::write(&path, "p:\n  d:\n    existing:\n      - name: id\n        type: INTEGER\n").unwrap();

        let mut store = SchemaStore::load(Some(path.clone())).unwrap();
        store.merge("p", "d", "fetched", users_schema());
        store.flush().unwrap();

        let reloaded = SchemaStore::load(Some(path)).unwrap();
        assert!(reloaded.lookup("p", "d", "existing").is_some());
        assert_eq!(reloaded.lookup("p", "d", "fetched"), Some(&users_schema()));
    }

    #[test]
    fn flush_then_load_round_trips_production_field_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        let schema = TableSchema::new(vec![
            SchemaField {
                default_value_expression: Some("0".to_string()),
                policy_tags: Some(PolicyTags {
                    names: vec!["projects/p/locations/us/taxonomies/1/policyTags/2".to_string()],
                }),
                ..SchemaField::new("amount", FieldType::Numeric)
                    .with_mode(FieldMode::Required)
                    .with_precision(10, 2)
            },
            SchemaField {
                collation: Some("und:ci".to_string()),
                ..SchemaField::new("code", FieldType::String).with_max_length(5)
            },
        ]);

        let mut store = SchemaStore::load(Some(path.clone())).unwrap();
        store.merge("p", "d", "t", schema.clone());
        store.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("maxLength: '5'"));
        assert!(contents.contains("defaultValueExpression: '0'"));

        let reloaded = SchemaStore::load(Some(path)).unwrap();
        assert_eq!(reloaded.lookup("p", "d", "t"), Some(&schema));
    }

    #[cfg(unix)]
    #[test]
    fn flush_keeps_the_mode_of_an_existing_file() {
        use std::os::unix::fs::PermissionsExt;

        for mode in [0o644, 0o640] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("schema.yaml");
            fs::write(
                &path,
                "p:\n  d:\n    existing:\n      - name: id\n        type: INTEGER\n",
            )
            .unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();

            let mut store = SchemaStore::load(Some(path.clone())).unwrap();
            store.merge("p", "d", "fetched", users_schema());
            assert!(store.flush().unwrap());

            let written = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(written, mode);
        }
    }

    #[cfg(unix)]
    #[test]
    fn new_file_is_not_restricted_to_its_owner_beyond_the_umask() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        let reference = dir.path().join("reference");
        fs::write(&reference, "").unwrap();

        let mut store = SchemaStore::load(Some(path.clone())).unwrap();
        store.merge("p", "d", "t", users_schema());
        store.flush().unwrap();

        let mode_of = |path: &Path| fs::metadata(path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode_of(&path), mode_of(&reference));
    }

    #[test]
    fn written_file_starts_with_provenance_header() {
        let mut cache = SchemaCache::new();
        cache.merge("project", "dataset", "table", users_schema());

        let encoded = YamlCodec.encode(&cache).unwrap();

        insta::assert_snapshot!(encoded, @r#"
        # This file is generated from BigQuery table metadata by "bqem"; DO NOT EDIT.
        project:
          dataset:
            table:
            - name: id
              type: INTEGER
              mode: NULLABLE
            - name: name
              type: STRING
              mode: NULLABLE
        "#);
    }
}

//! Table schemas and the schema cache.

mod cache;
mod field;
mod resolver;
mod store;

pub use cache::{DatasetSchemas, ProjectSchemas, SchemaCache};
pub use field::{FieldMode, FieldType, PolicyTags, RangeElementType, SchemaField, TableSchema};
pub use resolver::SchemaResolver;
pub use store::{PROVENANCE_HEADER, SchemaCodec, SchemaStore, YamlCodec};

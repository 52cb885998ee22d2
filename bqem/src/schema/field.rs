use serde::{Deserialize, Serialize};
use std::fmt;

/// BigQuery column data type.
///
/// Serialized with the legacy names the REST API reports (`INTEGER`, `FLOAT`, `BOOLEAN`,
/// `RECORD`); the standard SQL spellings are accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "STRING")]
    String,
    #[serde(rename = "BYTES")]
    Bytes,
    #[serde(rename = "INTEGER", alias = "INT64")]
    Integer,
    #[serde(rename = "FLOAT", alias = "FLOAT64")]
    Float,
    #[serde(rename = "NUMERIC")]
    Numeric,
    #[serde(rename = "BIGNUMERIC")]
    BigNumeric,
    #[serde(rename = "BOOLEAN", alias = "BOOL")]
    Boolean,
    #[serde(rename = "TIMESTAMP")]
    Timestamp,
    #[serde(rename = "DATE")]
    Date,
    #[serde(rename = "TIME")]
    Time,
    #[serde(rename = "DATETIME")]
    DateTime,
    #[serde(rename = "GEOGRAPHY")]
    Geography,
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "INTERVAL")]
    Interval,
    #[serde(rename = "RANGE")]
    Range,
    #[serde(rename = "RECORD", alias = "STRUCT")]
    Record,
}

impl FieldType {
    /// Returns the name used on the wire and in the cache file.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Bytes => "BYTES",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Numeric => "NUMERIC",
            FieldType::BigNumeric => "BIGNUMERIC",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "DATETIME",
            FieldType::Geography => "GEOGRAPHY",
            FieldType::Json => "JSON",
            FieldType::Interval => "INTERVAL",
            FieldType::Range => "RANGE",
            FieldType::Record => "RECORD",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nullability and repetition of a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

/// A single column definition.
///
/// `fields` is only populated for [`FieldType::Record`] columns and keeps the declared order of
/// the nested columns. The optional properties mirror BigQuery's `TableFieldSchema` so that
/// schemas fetched from production keep their constraints in the cache file and in tables
/// created in the emulator. Int64 properties are kept as strings, the way the REST API
/// reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub typ: FieldType,
    #[serde(default)]
    pub mode: FieldMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "int64::deserialize"
    )]
    pub max_length: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "int64::deserialize"
    )]
    pub precision: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "int64::deserialize"
    )]
    pub scale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounding_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_tags: Option<PolicyTags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_element_type: Option<RangeElementType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<SchemaField>,
}

/// Policy tags attached to a column for column-level access control.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTags {
    #[serde(default)]
    pub names: Vec<String>,
}

/// Element type of a [`FieldType::Range`] column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeElementType {
    #[serde(rename = "type")]
    pub typ: FieldType,
}

/// Accepts int64 properties written either as JSON strings or as plain numbers.
mod int64 {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Text(String),
        Number(i64),
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Int64>::deserialize(deserializer)?;

        Ok(value.map(|value| match value {
            Int64::Text(text) => text,
            Int64::Number(number) => number.to_string(),
        }))
    }
}

impl SchemaField {
    /// Creates a nullable column without nested fields.
    pub fn new(name: impl Into<String>, typ: FieldType) -> Self {
        Self {
            name: name.into(),
            typ,
            mode: FieldMode::Nullable,
            description: None,
            max_length: None,
            precision: None,
            scale: None,
            rounding_mode: None,
            collation: None,
            default_value_expression: None,
            policy_tags: None,
            range_element_type: None,
            fields: Vec::new(),
        }
    }

    /// Creates a nullable [`FieldType::Record`] column holding `fields`.
    pub fn record(name: impl Into<String>, fields: Vec<SchemaField>) -> Self {
        Self::new(name, FieldType::Record).with_fields(fields)
    }

    pub fn with_mode(mut self, mode: FieldMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the precision and scale of a `NUMERIC` or `BIGNUMERIC` column.
    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision.to_string());
        self.scale = Some(scale.to_string());
        self
    }

    pub fn with_max_length(mut self, max_length: u64) -> Self {
        self.max_length = Some(max_length.to_string());
        self
    }

    pub fn with_fields(mut self, fields: Vec<SchemaField>) -> Self {
        self.fields = fields;
        self
    }

    /// Returns `true` if values of this column are arrays.
    pub fn is_repeated(&self) -> bool {
        self.mode == FieldMode::Repeated
    }
}

/// Ordered column definitions of a table.
///
/// The order matches the column order of the table and is preserved by every operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
    fields: Vec<SchemaField>,
}

impl TableSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns the top level column with the given name.
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn into_fields(self) -> Vec<SchemaField> {
        self.fields
    }
}

impl From<Vec<SchemaField>> for TableSchema {
    fn from(fields: Vec<SchemaField>) -> Self {
        Self::new(fields)
    }
}

impl<'a> IntoIterator for &'a TableSchema {
    type Item = &'a SchemaField;
    type IntoIter = std::slice::Iter<'a, SchemaField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

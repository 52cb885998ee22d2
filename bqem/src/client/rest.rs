use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::{DatabaseClient, DatasetRef, QueryResult, Row, Table, TableRef};
use crate::error::{BqemResult, ErrorKind};
use crate::schema::{FieldType, SchemaField, TableSchema};
use crate::{bail, bqem_error};

/// Maximum time to establish a connection to the service.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between two polls of a query job that has not completed yet.
const QUERY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default time a query job may take to complete.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// BigQuery v2 REST API client.
///
/// Targets either a local emulator ([`BigQueryRestClient::for_emulator`]) without credentials,
/// or a production endpoint ([`BigQueryRestClient::new`]) with an optional OAuth bearer token.
#[derive(Debug, Clone)]
pub struct BigQueryRestClient {
    client: Client,
    endpoint: String,
    access_token: Option<SecretString>,
    query_timeout: Duration,
}

impl BigQueryRestClient {
    /// Creates a client for the service at `endpoint`, e.g. `https://bigquery.googleapis.com`.
    pub fn new(
        endpoint: impl Into<String>,
        access_token: Option<SecretString>,
    ) -> BqemResult<BigQueryRestClient> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;

        Ok(BigQueryRestClient {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
            access_token,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    /// Sets how long [`DatabaseClient::query`] waits for an incomplete job before failing.
    pub fn with_query_timeout(mut self, query_timeout: Duration) -> BigQueryRestClient {
        self.query_timeout = query_timeout;
        self
    }

    /// Creates an anonymous client for an emulator listening on `localhost:<port>`.
    pub fn for_emulator(port: u16) -> BqemResult<BigQueryRestClient> {
        Self::new(format!("http://localhost:{port}"), None)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn project_url(&self, project_id: &str) -> String {
        format!("{}/bigquery/v2/projects/{project_id}", self.endpoint)
    }

    fn datasets_url(&self, project_id: &str) -> String {
        format!("{}/datasets", self.project_url(project_id))
    }

    fn tables_url(&self, dataset: &DatasetRef) -> String {
        format!(
            "{}/{}/tables",
            self.datasets_url(&dataset.project_id),
            dataset.dataset_id
        )
    }

    fn table_url(&self, table: &TableRef) -> String {
        format!("{}/{}", self.tables_url(&table.dataset()), table.table_id)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let builder = self.client.request(method, url);

        match &self.access_token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// Returns the response if its status is a success and a [`ErrorKind::ClientResponseError`]
    /// carrying the status and body otherwise.
    async fn check_status(response: Response, description: &'static str) -> BqemResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        bail!(
            ErrorKind::ClientResponseError,
            description,
            format!("{status}: {body}")
        )
    }

    /// Posts a create request; a `409 Conflict` means the resource already exists.
    async fn create<B: Serialize>(
        &self,
        url: String,
        body: &B,
        description: &'static str,
    ) -> BqemResult<bool> {
        let response = self.request(Method::POST, url).json(body).send().await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }

        Self::check_status(response, description).await?;

        Ok(true)
    }

    async fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> BqemResult<QueryResponse> {
        let url = format!("{}/queries/{}", self.project_url(&job.project_id), job.job_id);

        let mut request = self.request(Method::GET, url);
        if let Some(location) = &job.location {
            request = request.query(&[("location", location.as_str())]);
        }
        if let Some(page_token) = page_token {
            request = request.query(&[("pageToken", page_token)]);
        }

        let response = request.send().await?;
        let response = Self::check_status(response, "Fetching query results failed").await?;

        Ok(response.json().await?)
    }
}

impl DatabaseClient for BigQueryRestClient {
    async fn get_table(&self, table: &TableRef) -> BqemResult<Table> {
        let response = self
            .request(Method::GET, self.table_url(table))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            bail!(
                ErrorKind::TableNotFound,
                "Table does not exist",
                table.to_string()
            );
        }

        let response = Self::check_status(response, "Fetching table metadata failed").await?;
        let resource: TableResource = response.json().await?;

        debug!(%table, fields = resource.schema.fields.len(), "fetched table metadata");

        Ok(Table {
            reference: table.clone(),
            schema: resource.schema.fields,
        })
    }

    async fn create_dataset(&self, dataset: &DatasetRef) -> BqemResult<bool> {
        let body = DatasetResource {
            dataset_reference: DatasetReference {
                project_id: &dataset.project_id,
                dataset_id: &dataset.dataset_id,
            },
        };

        let created = self
            .create(
                self.datasets_url(&dataset.project_id),
                &body,
                "Creating dataset failed",
            )
            .await?;

        info!(%dataset, created, "dataset ensured");

        Ok(created)
    }

    async fn create_table(&self, table: &TableRef, schema: &TableSchema) -> BqemResult<bool> {
        let body = NewTableResource {
            table_reference: TableReference {
                project_id: &table.project_id,
                dataset_id: &table.dataset_id,
                table_id: &table.table_id,
            },
            schema: SchemaResource { fields: schema },
        };

        let created = self
            .create(
                self.tables_url(&table.dataset()),
                &body,
                "Creating table failed",
            )
            .await?;

        info!(%table, created, "table ensured");

        Ok(created)
    }

    async fn insert_rows(&self, table: &TableRef, rows: &[Row]) -> BqemResult<()> {
        let body = InsertAllRequest {
            rows: rows.iter().map(|json| InsertAllRow { json }).collect(),
        };

        let url = format!("{}/insertAll", self.table_url(table));
        let response = self.request(Method::POST, url).json(&body).send().await?;
        let response = Self::check_status(response, "Inserting rows failed").await?;
        let result: InsertAllResponse = response.json().await?;

        if !result.insert_errors.is_empty() {
            let detail = result
                .insert_errors
                .iter()
                .map(InsertErrors::describe)
                .collect::<Vec<_>>()
                .join("\n");

            bail!(
                ErrorKind::InsertRowsFailed,
                "Rows were rejected by the table",
                format!("{table}: {detail}")
            );
        }

        debug!(%table, rows = rows.len(), "rows inserted");

        Ok(())
    }

    async fn query(&self, project_id: &str, sql: &str) -> BqemResult<QueryResult> {
        let body = QueryRequest {
            query: sql,
            use_legacy_sql: false,
        };

        let url = format!("{}/queries", self.project_url(project_id));
        let response = self.request(Method::POST, url).json(&body).send().await?;
        let response = Self::check_status(response, "Running query failed").await?;
        let mut page: QueryResponse = response.json().await?;
        let deadline = Instant::now() + self.query_timeout;

        let mut result = QueryResult::default();
        loop {
            if !page.job_complete.unwrap_or(true) {
                let Some(job) = page.job_reference.clone() else {
                    bail!(
                        ErrorKind::ClientResponseError,
                        "Incomplete query job has no job reference"
                    );
                };

                if Instant::now() >= deadline {
                    bail!(
                        ErrorKind::ClientResponseError,
                        "Query job did not complete in time",
                        format!(
                            "job {} still running after {} ms",
                            job.job_id,
                            self.query_timeout.as_millis()
                        )
                    );
                }

                tokio::time::sleep(QUERY_POLL_INTERVAL).await;
                page = self.query_results(&job, None).await?.with_job(job);
                continue;
            }

            if let Some(schema) = page.schema.take().filter(|_| result.schema.is_empty()) {
                result.schema = schema.fields;
            }

            for row in page.rows.drain(..) {
                result.rows.push(decode_row(result.schema.fields(), row)?);
            }

            let Some(page_token) = page.page_token.take() else {
                break;
            };
            let Some(job) = page.job_reference.clone() else {
                bail!(
                    ErrorKind::ClientResponseError,
                    "Paginated query result has no job reference",
                    format!("page token {page_token}, {} rows read", result.len())
                );
            };

            page = self
                .query_results(&job, Some(&page_token))
                .await?
                .with_job(job);
        }

        debug!(project_id, rows = result.len(), "query finished");

        Ok(result)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatasetResource<'a> {
    dataset_reference: DatasetReference<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Serialize)]
struct SchemaResource<'a> {
    fields: &'a TableSchema,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewTableResource<'a> {
    table_reference: TableReference<'a>,
    schema: SchemaResource<'a>,
}

#[derive(Debug, Default, Deserialize)]
struct WireSchema {
    #[serde(default)]
    fields: TableSchema,
}

#[derive(Debug, Deserialize)]
struct TableResource {
    #[serde(default)]
    schema: WireSchema,
}

#[derive(Serialize)]
struct InsertAllRow<'a> {
    json: &'a Row,
}

#[derive(Serialize)]
struct InsertAllRequest<'a> {
    rows: Vec<InsertAllRow<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Debug, Deserialize)]
struct InsertErrors {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

impl InsertErrors {
    fn describe(&self) -> String {
        let reasons = self
            .errors
            .iter()
            .map(|error| format!("{} ({})", error.message, error.reason))
            .collect::<Vec<_>>()
            .join(", ");

        format!("row {}: {reasons}", self.index)
    }
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    schema: Option<WireSchema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    page_token: Option<String>,
}

impl QueryResponse {
    /// Keeps following `job` when a results page omits its job reference.
    fn with_job(mut self, job: JobReference) -> Self {
        self.job_reference.get_or_insert(job);
        self
    }
}

#[derive(Debug, Deserialize)]
struct WireRow {
    #[serde(default)]
    f: Vec<WireCell>,
}

#[derive(Debug, Deserialize)]
struct WireCell {
    #[serde(default)]
    v: Value,
}

/// Converts a row in the `{"f": [{"v": ...}]}` encoding into an object keyed by column name.
fn decode_row(fields: &[SchemaField], row: WireRow) -> BqemResult<Row> {
    if fields.len() != row.f.len() {
        bail!(
            ErrorKind::DeserializationError,
            "Query row does not match the result schema",
            format!("expected {} cells, got {}", fields.len(), row.f.len())
        );
    }

    fields
        .iter()
        .zip(row.f)
        .map(|(field, cell)| Ok((field.name.clone(), decode_cell(field, cell.v)?)))
        .collect()
}

fn decode_cell(field: &SchemaField, value: Value) -> BqemResult<Value> {
    if !field.is_repeated() {
        return decode_value(field, value);
    }

    match value {
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(mut cell) => {
                    decode_value(field, cell.remove("v").unwrap_or(Value::Null))
                }
                other => decode_value(field, other),
            })
            .collect::<BqemResult<Vec<_>>>()
            .map(Value::Array),
        other => Err(bqem_error!(
            ErrorKind::DeserializationError,
            "Repeated column value is not an array",
            format!("{}: {other}", field.name)
        )),
    }
}

fn decode_value(field: &SchemaField, value: Value) -> BqemResult<Value> {
    let decoded = match (field.typ, value) {
        (_, Value::Null) => Value::Null,
        (FieldType::Record, record @ Value::Object(_)) => {
            let row: WireRow = serde_json::from_value(record)?;
            Value::Object(decode_row(&field.fields, row)?)
        }
        (FieldType::Integer, Value::String(text)) => match text.parse::<i64>() {
            Ok(number) => Value::from(number),
            Err(_) => Value::String(text),
        },
        (FieldType::Float, Value::String(text)) => match text.parse::<f64>() {
            Ok(number) if number.is_finite() => Value::from(number),
            _ => Value::String(text),
        },
        (FieldType::Boolean, Value::String(text)) => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        (_, other) => other,
    };

    Ok(decoded)
}

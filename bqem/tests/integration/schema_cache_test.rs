use std::fs;

use bqem::client::BigQueryRestClient;
use bqem::error::ErrorKind;
use bqem::schema::{FieldType, SchemaField, SchemaResolver, SchemaStore, TableSchema};
use serde_json::json;
use telemetry::init_test_tracing;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn events_schema() -> TableSchema {
    TableSchema::new(vec![
        SchemaField::new("event_id", FieldType::String),
        SchemaField::new("occurred_at", FieldType::Timestamp),
    ])
}

#[tokio::test(flavor = "multi_thread")]
async fn schemas_fetched_from_production_are_reused_offline_test() {
    init_test_tracing();
    let production = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/bigquery/v2/projects/analytics/datasets/raw/tables/events",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": {"fields": [
                {"name": "event_id", "type": "STRING", "mode": "NULLABLE"},
                {"name": "occurred_at", "type": "TIMESTAMP", "mode": "NULLABLE"}
            ]}
        })))
        .expect(1)
        .mount(&production)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("bqem_master_schema.yaml");

    let remote = BigQueryRestClient::new(production.uri(), None).unwrap();
    let mut resolver =
        SchemaResolver::new(SchemaStore::load(Some(cache_path.clone())).unwrap(), Some(remote));
    for _ in 0..2 {
        let schema = resolver.resolve("analytics", "raw", "events").await.unwrap();
        assert_eq!(schema, events_schema());
    }
    assert!(resolver.flush().unwrap());

    let mut offline: SchemaResolver<BigQueryRestClient> =
        SchemaResolver::new(SchemaStore::load(Some(cache_path)).unwrap(), None);
    assert_eq!(
        offline.resolve("analytics", "raw", "events").await.unwrap(),
        events_schema()
    );
    assert_eq!(
        offline
            .resolve("analytics", "raw", "sessions")
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::SchemaNotFound
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cache_files_with_empty_entries_are_pruned_test() {
    init_test_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("schema.yaml");
    fs::write(
        &cache_path,
        "---\nanalytics:\n  raw:\n    events:\n    - name: event_id\n      type: STRING\n    pending: []\n  staging: {}\n",
    )
    .unwrap();

    let store = SchemaStore::load(Some(cache_path)).unwrap();

    assert_eq!(store.cache().table_count(), 1);
    assert!(store.lookup("analytics", "raw", "pending").is_none());
    assert!(
        store
            .cache()
            .project("analytics")
            .unwrap()
            .dataset("staging")
            .is_none()
    );
}

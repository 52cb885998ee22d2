use std::fs;

use bqem::prelude::*;
use bqem::schema::{PROVENANCE_HEADER, SchemaStore};
use config::shared::{ManagerConfig, RemoteSchemaConfig};
use serde_json::json;
use telemetry::init_test_tracing;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USERS_CACHE: &str = "test:\n  shop:\n    users:\n    - name: id\n      type: INTEGER\n    - name: name\n      type: STRING\n";

/// Configuration for a manager using an already running emulator served by `emulator`.
fn external_config(emulator: &MockServer) -> ManagerConfig {
    let port = emulator.address().port();

    ManagerConfig {
        port,
        grpc_port: port.wrapping_add(1),
        launch_emulator: false,
        remote: RemoteSchemaConfig {
            enabled: false,
            ..RemoteSchemaConfig::default()
        },
        ..ManagerConfig::default()
    }
}

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn load_and_query_against_an_external_emulator_test() {
    init_test_tracing();
    let emulator = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/test/datasets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&emulator)
        .await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/test/datasets/shop/tables"))
        .and(body_partial_json(json!({
            "tableReference": {"tableId": "users"},
            "schema": {"fields": [{"name": "id"}, {"name": "name"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&emulator)
        .await;
    Mock::given(method("POST"))
        .and(path(
            "/bigquery/v2/projects/test/datasets/shop/tables/users/insertAll",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&emulator)
        .await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/test/queries"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobReference": {"projectId": "test", "jobId": "q1"},
            "jobComplete": true,
            "schema": {"fields": [
                {"name": "id", "type": "INTEGER"},
                {"name": "name", "type": "STRING"}
            ]},
            "rows": [
                {"f": [{"v": "1"}, {"v": "alice"}]},
                {"f": [{"v": "2"}, {"v": "bob"}]}
            ]
        })))
        .expect(1)
        .mount(&emulator)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("schema.yaml");
    fs::write(&cache_path, USERS_CACHE).unwrap();
    let config = ManagerConfig {
        schema_path: Some(cache_path.clone()),
        ..external_config(&emulator)
    };

    let result = with_manager(config, async |manager: &mut Manager| {
        assert_eq!(manager.ports(), None);

        manager
            .load(vec![row(json!({"id": 1, "name": "alice"}))], "shop.users")
            .await?;
        manager
            .load(vec![row(json!({"id": 2, "name": "bob"}))], "shop.users")
            .await?;
        assert!(manager.datasets().contains_table("shop", "users"));

        manager.query("select * from shop.users order by id").await
    })
    .await
    .unwrap();

    assert_eq!(
        result.rows,
        vec![
            row(json!({"id": 1, "name": "alice"})),
            row(json!({"id": 2, "name": "bob"}))
        ]
    );
    // Nothing was fetched remotely, so the cache file is left untouched.
    assert_eq!(fs::read_to_string(&cache_path).unwrap(), USERS_CACHE);
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_schemas_are_cached_for_offline_runs_test() {
    init_test_tracing();
    let production = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/bigquery/v2/projects/test/datasets/shop/tables/orders",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schema": {"fields": [
                {"name": "order_id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "items", "type": "RECORD", "mode": "REPEATED", "fields": [
                    {"name": "sku", "type": "STRING"},
                    {"name": "quantity", "type": "INTEGER"}
                ]}
            ]}
        })))
        .expect(1)
        .mount(&production)
        .await;

    let emulator = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/test/datasets"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&emulator)
        .await;
    Mock::given(method("POST"))
        .and(path("/bigquery/v2/projects/test/datasets/shop/tables"))
        .and(body_partial_json(json!({
            "schema": {"fields": [{"name": "order_id", "mode": "REQUIRED"}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&emulator)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("cache").join("schema.yaml");
    let config = ManagerConfig {
        schema_path: Some(cache_path.clone()),
        remote: RemoteSchemaConfig {
            enabled: true,
            endpoint: production.uri(),
            access_token: None,
        },
        ..external_config(&emulator)
    };

    with_manager(config, async |manager: &mut Manager| {
        manager.load(Vec::new(), "shop.orders").await?;
        manager
            .create_table("shop", "orders", TableSchemaSource::Resolve)
            .await
    })
    .await
    .unwrap();

    let contents = fs::read_to_string(&cache_path).unwrap();
    assert!(contents.starts_with(PROVENANCE_HEADER));

    let store = SchemaStore::load(Some(cache_path)).unwrap();
    let schema = store.lookup("test", "shop", "orders").unwrap();
    assert_eq!(schema.len(), 2);
    assert_eq!(schema.field("items").unwrap().fields.len(), 2);
    assert_eq!(schema.field("order_id").unwrap().mode, FieldMode::Required);
}

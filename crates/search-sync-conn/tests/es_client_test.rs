//! HTTP document store client against a mocked cluster.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use search_sync_conn::{
    cutover_alias, AliasCutover, BulkOp, ConnError, DocumentStore, EsClient, EsClientConfig,
    HealthStatus, SearchRequest,
};

fn client(server: &MockServer) -> EsClient {
    EsClient::new(EsClientConfig::new(server.uri())).unwrap()
}

fn ndjson_lines(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_create_index_already_exists_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/tracks1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"type": "resource_already_exists_exception"},
            "status": 400
        })))
        .mount(&server)
        .await;

    let created = client(&server)
        .create_index("tracks1", &json!({"mappings": {}}))
        .await
        .unwrap();
    assert!(!created);
}

#[tokio::test]
async fn test_create_index_bad_mapping_fails() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/tracks1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"type": "mapper_parsing_exception"},
            "status": 400
        })))
        .mount(&server)
        .await;

    let result = client(&server).create_index("tracks1", &json!({})).await;
    assert!(matches!(result, Err(ConnError::Store { status: 400, .. })));
}

#[tokio::test]
async fn test_delete_missing_index_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/users1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(!client(&server).delete_index("users1").await.unwrap());
}

#[tokio::test]
async fn test_get_alias_lists_indices() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_alias/tracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tracks1": {"aliases": {"tracks": {}}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_alias/users"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "alias [users] missing", "status": 404
        })))
        .mount(&server)
        .await;

    let es = client(&server);
    assert_eq!(es.get_alias("tracks").await.unwrap(), vec!["tracks1"]);
    assert!(es.get_alias("users").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cutover_sends_single_atomic_update() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_alias/tracks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tracks1": {"aliases": {"tracks": {}}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_aliases"))
        .and(body_json(json!({"actions": [
            {"remove": {"index": "tracks1", "alias": "tracks"}},
            {"add": {"index": "tracks2", "alias": "tracks"}}
        ]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
        .expect(1)
        .mount(&server)
        .await;

    let es = client(&server);
    let outcome = cutover_alias(&es, "tracks", "tracks2").await.unwrap();
    assert_eq!(
        outcome,
        AliasCutover::Swapped {
            from: vec!["tracks1".to_string()]
        }
    );
}

#[tokio::test]
async fn test_bulk_sends_action_document_pairs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 3,
            "errors": false,
            "items": [
                {"index": {"_index": "tracks1", "_id": "1", "status": 201}},
                {"index": {"_index": "tracks1", "_id": "2", "status": 201}}
            ]
        })))
        .mount(&server)
        .await;

    let ops = vec![
        BulkOp {
            index: "tracks1".to_string(),
            id: "1".to_string(),
            doc: json!({"title": "one"}).as_object().cloned().unwrap(),
        },
        BulkOp {
            index: "tracks1".to_string(),
            id: "2".to_string(),
            doc: json!({"title": "two"}).as_object().cloned().unwrap(),
        },
    ];
    let response = client(&server).bulk(&ops).await.unwrap();
    assert!(!response.errors);
    assert_eq!(response.items.len(), 2);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        ndjson_lines(&requests[0].body),
        vec![
            json!({"index": {"_index": "tracks1", "_id": "1"}}),
            json!({"title": "one"}),
            json!({"index": {"_index": "tracks1", "_id": "2"}}),
            json!({"title": "two"}),
        ]
    );
}

#[tokio::test]
async fn test_bulk_partial_failure_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 429, "error": {"type": "es_rejected_execution_exception"}}}
            ]
        })))
        .mount(&server)
        .await;

    let ops = vec![BulkOp {
        index: "tracks1".to_string(),
        id: "1".to_string(),
        doc: Default::default(),
    }];
    let response = client(&server).bulk(&ops).await.unwrap();
    assert!(response.errors);
    assert_eq!(response.error_count(), 1);
    assert_eq!(response.first_error().unwrap()["index"]["_id"], "2");
}

#[tokio::test]
async fn test_msearch_returns_responses_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_msearch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "responses": [
                {"aggregations": {"max_version": {"value": 100.0}}},
                {"error": {"type": "index_not_found_exception"}, "status": 404}
            ]
        })))
        .mount(&server)
        .await;

    let searches = vec![
        SearchRequest {
            index: "tracks".to_string(),
            body: json!({"size": 0}),
        },
        SearchRequest {
            index: "saves".to_string(),
            body: json!({"size": 0}),
        },
    ];
    let responses = client(&server).msearch(&searches).await.unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["aggregations"]["max_version"]["value"], 100.0);
    assert!(responses[1].get("error").is_some());

    let requests = server.received_requests().await.unwrap();
    let lines = ndjson_lines(&requests[0].body);
    assert_eq!(lines[0], json!({"index": "tracks"}));
    assert_eq!(lines[2], json!({"index": "saves"}));
}

#[tokio::test]
async fn test_cluster_health_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .and(query_param("wait_for_status", "yellow"))
        .and(query_param("timeout", "30s"))
        .respond_with(ResponseTemplate::new(408).set_body_json(json!({
            "status": "red",
            "timed_out": true
        })))
        .mount(&server)
        .await;

    let health = client(&server)
        .cluster_health(HealthStatus::Yellow, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(health.status, HealthStatus::Red);
    assert!(health.timed_out);
}

#[tokio::test]
async fn test_cat_indices_parses_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cat/indices"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"health": "green", "status": "open", "index": "users1", "docs.count": "10"},
            {"health": "red", "status": "open", "index": "tracks1", "docs.count": "0"}
        ])))
        .mount(&server)
        .await;

    let indices = client(&server).cat_indices().await.unwrap();
    let red: Vec<&str> = indices
        .iter()
        .filter(|i| i.is_red())
        .map(|i| i.index.as_str())
        .collect();
    assert_eq!(red, vec!["tracks1"]);
}

//! Integration tests for the REST source-of-record client using wiremock.
//!
//! These tests run the client against a mock HTTP server, covering change
//! queries, pagination draining, lookups, authentication and retries.

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hpcsync_connector::prelude::*;
use hpcsync_connector_rest::{PaginationStyle, RestSourceConfig, RestSourceOfRecord, RetryConfig};

// =============================================================================
// Test Helpers
// =============================================================================

fn create_config(base_url: &str) -> RestSourceConfig {
    RestSourceConfig::new(base_url).with_retry(RetryConfig::disabled())
}

fn account(key: &str, modified: &str) -> serde_json::Value {
    json!({"key": key, "modified": modified, "status": "active"})
}

// =============================================================================
// Change Queries
// =============================================================================

#[tokio::test]
async fn test_list_modified_sends_rfc3339_since() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(query_param("modified_since", "2024-03-01T00:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [account("vsc40001", "2024-03-01T10:00:00Z")],
            "next": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let entities = source
        .list_modified(EntityKind::Account, since)
        .await
        .unwrap();

    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].key, "vsc40001");
    assert_eq!(entities[0].kind, EntityKind::Account);
    assert_eq!(entities[0].attributes.get_string("status"), Some("active"));
}

#[tokio::test]
async fn test_next_link_pagination_is_drained() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [account("vsc40003", "2024-03-02T00:00:00Z")],
            "next": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(query_param("page_size", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                account("vsc40001", "2024-03-01T00:00:00Z"),
                account("vsc40002", "2024-03-01T00:00:00Z")
            ],
            "next": format!("{}/account?page=2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let entities = source.list_all(EntityKind::Account).await.unwrap();

    let keys: Vec<&str> = entities.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["vsc40001", "vsc40002", "vsc40003"]);
}

#[tokio::test]
async fn test_page_number_pagination_stops_on_short_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/group"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "g1", "modified": "2024-03-01T00:00:00Z"},
            {"key": "g2", "modified": "2024-03-01T00:00:00Z"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/group"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"key": "g3", "modified": "2024-03-01T00:00:00Z"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_config(&server.uri())
        .with_page_size(2)
        .with_pagination(PaginationStyle::PageNumber);
    let source = RestSourceOfRecord::new(config).unwrap();
    let entities = source.list_all(EntityKind::Group).await.unwrap();

    assert_eq!(entities.len(), 3);
}

#[tokio::test]
async fn test_list_children_fills_parent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/pubkey"))
        .and(query_param("parent", "vsc40001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"key": "1", "modified": "2024-03-01T00:00:00Z", "pubkey": "ssh-ed25519 A"},
                {"key": "2", "modified": "2024-03-01T00:00:00Z", "pubkey": "ssh-ed25519 B", "deleted": true}
            ]
        })))
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let keys = source
        .list_children(EntityKind::Pubkey, "vsc40001")
        .await
        .unwrap();

    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.parent.as_deref() == Some("vsc40001")));
    assert!(keys[1].deleted);
}

// =============================================================================
// Lookups
// =============================================================================

#[tokio::test]
async fn test_get_existing_entity() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/vo/gvo00002"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "key": "gvo00002",
            "modified": "2024-03-01T00:00:00Z",
            "members": ["vsc40001", "vsc40002"]
        })))
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let vo = source.get(EntityKind::Vo, "gvo00002").await.unwrap().unwrap();

    assert_eq!(vo.attributes.get_strings("members"), vec!["vsc40001", "vsc40002"]);
}

#[tokio::test]
async fn test_get_missing_entity_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account/vsc49999"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let result = source.get(EntityKind::Account, "vsc49999").await.unwrap();
    assert!(result.is_none());
}

// =============================================================================
// Authentication and Errors
// =============================================================================

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("Authorization", "Bearer t0k3n"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_config(&server.uri()).with_token("t0k3n");
    let source = RestSourceOfRecord::new(config).unwrap();
    let entities = source.list_all(EntityKind::Account).await.unwrap();
    assert!(entities.is_empty());
}

#[tokio::test]
async fn test_unauthorized_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let err = source.list_all(EntityKind::Account).await.unwrap_err();
    assert!(matches!(err, ConnectorError::AuthenticationFailed));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let err = source.list_all(EntityKind::Account).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_malformed_record_fails_the_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"results": [{"status": "active"}]})),
        )
        .mount(&server)
        .await;

    let source = RestSourceOfRecord::new(create_config(&server.uri())).unwrap();
    let err = source.list_all(EntityKind::Account).await.unwrap_err();
    assert!(matches!(err, ConnectorError::InvalidData { .. }));
}

// =============================================================================
// Retry Tests
// =============================================================================

#[tokio::test]
async fn test_retry_on_service_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [account("vsc40001", "2024-03-01T00:00:00Z")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = RestSourceConfig::new(server.uri())
        .with_retry(RetryConfig::new(2).with_initial_backoff(1));
    let source = RestSourceOfRecord::new(config).unwrap();
    let entities = source.list_all(EntityKind::Account).await.unwrap();
    assert_eq!(entities.len(), 1);
}

use httpmock::{Method::GET, MockServer};
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use turnstone::codec::payload::PayloadExtractor;
use turnstone::config::ServiceConfig;
use turnstone::gateway::dispatcher::RequestDispatcher;
use turnstone::gateway::engine::MappingEngine;
use turnstone::handle::{HandleManager, InMemoryHandleManager};
use turnstone::mapping::repository::MappingRepository;
use turnstone::mapping::transformer::TransformerRegistry;
use turnstone::protocol::{
    ProtocolRequest, Segment, OP_CREATE, OP_DELETE, OP_HELLO, OP_LIST_OPERATIONS, OP_RETRIEVE,
    OP_SEARCH, OP_UPDATE, OP_VALIDATE,
};
use turnstone::status::ProtocolStatus;
use uuid::Uuid;

const SERVICE_ID: &str = "service/test";

fn temp_mappings_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("turnstone-test-{}", Uuid::new_v4()));
    fs::create_dir_all(&dir).expect("create mappings dir");
    dir
}

fn write_mapping(dir: &Path, name: &str, descriptor: &JsonValue) {
    let encoded = serde_json::to_vec_pretty(descriptor).expect("encode mapping");
    fs::write(dir.join(name), encoded).expect("write mapping file");
}

fn retrieve_mapping(target: &str, base_url: &str) -> JsonValue {
    json!({
        "targetId": target,
        "baseUrl": base_url,
        "retrieve": [{
            "label": "metadata",
            "verb": "GET",
            "requestUrl": "schemas/{targetId}",
            "transformerName": "schema-record"
        }]
    })
}

fn config_for(mappings_dir: &Path) -> ServiceConfig {
    ServiceConfig {
        service_id: SERVICE_ID.to_string(),
        service_name: Some("turnstone test service".to_string()),
        service_description: None,
        listen_address: "127.0.0.1".to_string(),
        port: 8880,
        public_key: None,
        authentication_enabled: false,
        default_token: None,
        mappings_dir: mappings_dir.display().to_string(),
        mappings_suffix: "_mapping.json".to_string(),
        handle_prefix: "123456".to_string(),
        backend_timeout: Duration::from_secs(5),
        max_stream_bytes: 64 * 1024,
        drain_timeout: Duration::from_secs(2),
    }
}

fn dispatcher(config: ServiceConfig) -> RequestDispatcher {
    let report = MappingRepository::load(Path::new(&config.mappings_dir), &config.mappings_suffix)
        .expect("load mappings");
    let handles: Arc<dyn HandleManager> =
        Arc::new(InMemoryHandleManager::new(config.handle_prefix.as_str()));
    let engine = MappingEngine::new(
        reqwest::Client::new(),
        TransformerRegistry::builtin(),
        handles,
        PayloadExtractor::new(config.max_stream_bytes),
        config.backend_timeout,
    );
    RequestDispatcher::new(Arc::new(config), report.repository, engine)
}

fn request(operation: &str, target: &str) -> ProtocolRequest {
    ProtocolRequest {
        operation_id: Some(operation.to_string()),
        target_id: target.to_string(),
        ..ProtocolRequest::default()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn hello_reports_the_service_envelope() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher.dispatch(request(OP_HELLO, SERVICE_ID)).await;

    assert_eq!(response.status, ProtocolStatus::Ok);
    let info = response.output[0].as_json().expect("service info");
    assert_eq!(info["id"], json!(SERVICE_ID));
    assert_eq!(info["type"], json!("0.TYPE/DOIPServiceInfo"));
    assert_eq!(info["attributes"]["serviceName"], json!("turnstone test service"));
    assert_eq!(info["attributes"]["ipAddress"], json!("127.0.0.1"));
    assert_eq!(info["attributes"]["port"], json!(8880));
    assert_eq!(info["attributes"]["protocol"], json!("TCP"));
    assert_eq!(info["attributes"]["protocolVersion"], json!("2.0"));
    assert!(info["attributes"].get("publicKey").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn hello_rejects_request_input() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let mut request = request(OP_HELLO, SERVICE_ID);
    request.input.push(Segment::Json(json!({})));

    let response = dispatcher.dispatch(request).await;
    assert_eq!(response.status, ProtocolStatus::BadRequest);
    assert_eq!(response.message(), Some("Input is not allowed for this operation."));
}

#[tokio::test(flavor = "multi_thread")]
async fn service_target_lists_service_operations() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher
        .dispatch(request(OP_LIST_OPERATIONS, SERVICE_ID))
        .await;

    assert_eq!(response.status, ProtocolStatus::Ok);
    assert_eq!(
        response.output[0].as_json(),
        Some(&json!([
            OP_HELLO,
            OP_LIST_OPERATIONS,
            OP_CREATE,
            OP_SEARCH,
            OP_VALIDATE,
        ]))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn object_target_lists_object_operations() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher
        .dispatch(request(OP_LIST_OPERATIONS, "object/x"))
        .await;

    assert_eq!(response.status, ProtocolStatus::Ok);
    assert_eq!(
        response.output[0].as_json(),
        Some(&json!([OP_LIST_OPERATIONS, OP_RETRIEVE, OP_UPDATE, OP_DELETE]))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_service_operation_is_declined() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher
        .dispatch(request("0.DOIP/Op.Reboot", SERVICE_ID))
        .await;

    assert_eq!(response.status, ProtocolStatus::Declined);
    assert_eq!(response.message(), Some("Operation not supported"));
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_object_operation_is_declined() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher.dispatch(request(OP_HELLO, "object/x")).await;

    assert_eq!(response.status, ProtocolStatus::Declined);
    assert_eq!(
        response.message(),
        Some("Operation 0.DOIP/Op.Hello is not supported for target object/x.")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_operation_id_is_a_bad_request() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));

    let absent = dispatcher
        .dispatch(ProtocolRequest {
            target_id: SERVICE_ID.to_string(),
            ..ProtocolRequest::default()
        })
        .await;
    assert_eq!(absent.status, ProtocolStatus::BadRequest);
    assert_eq!(absent.message(), Some("Missing operationId."));

    let empty = dispatcher.dispatch(request("", SERVICE_ID)).await;
    assert_eq!(empty.message(), Some("Missing operationId."));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_target_id_is_a_bad_request() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher.dispatch(request(OP_HELLO, "")).await;

    assert_eq!(response.status, ProtocolStatus::BadRequest);
    assert_eq!(response.message(), Some("Missing targetId."));
}

#[tokio::test(flavor = "multi_thread")]
async fn search_requires_a_query() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));

    let rejected = dispatcher.dispatch(request(OP_SEARCH, SERVICE_ID)).await;
    assert_eq!(rejected.status, ProtocolStatus::BadRequest);
    assert_eq!(rejected.message(), Some("Missing query"));

    let mut with_query = request(OP_SEARCH, SERVICE_ID);
    with_query.attributes = Some(json!({ "query": "type:JSON" }));
    let acknowledged = dispatcher.dispatch(with_query).await;
    assert_eq!(acknowledged.status, ProtocolStatus::Ok);
    assert_eq!(acknowledged.message(), Some("Search is not implemented yet."));
}

#[tokio::test(flavor = "multi_thread")]
async fn validate_and_delete_are_stubbed() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));

    let validated = dispatcher.dispatch(request(OP_VALIDATE, SERVICE_ID)).await;
    assert_eq!(validated.status, ProtocolStatus::Ok);
    assert_eq!(validated.message(), Some("Validation is not implemented yet."));

    let deleted = dispatcher.dispatch(request(OP_DELETE, "object/x")).await;
    assert_eq!(deleted.status, ProtocolStatus::Ok);
    assert_eq!(deleted.message(), Some("Delete is not implemented yet."));
}

#[tokio::test(flavor = "multi_thread")]
async fn create_without_a_mapping_is_declined() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher.dispatch(request(OP_CREATE, SERVICE_ID)).await;

    assert_eq!(response.status, ProtocolStatus::Declined);
    assert_eq!(
        response.message(),
        Some("Operation 0.DOIP/Op.Create is not supported for target service/test.")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unmapped_target_without_a_default_is_declined() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));
    let response = dispatcher.dispatch(request(OP_RETRIEVE, "object/x")).await;

    assert_eq!(response.status, ProtocolStatus::Declined);
    assert_eq!(
        response.message(),
        Some("Operation 0.DOIP/Op.Retrieve is not supported for target object/x.")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn request_id_echoes_on_success_and_failure() {
    let dispatcher = dispatcher(config_for(&temp_mappings_dir()));

    let mut succeeding = request(OP_HELLO, SERVICE_ID);
    succeeding.request_id = Some("req-77".to_string());
    let response = dispatcher.dispatch(succeeding).await;
    assert_eq!(response.request_id.as_deref(), Some("req-77"));

    let failing = ProtocolRequest {
        request_id: Some("req-78".to_string()),
        target_id: SERVICE_ID.to_string(),
        ..ProtocolRequest::default()
    };
    let response = dispatcher.dispatch(failing).await;
    assert_eq!(response.request_id.as_deref(), Some("req-78"));
    assert_eq!(response.status, ProtocolStatus::BadRequest);
}

#[tokio::test(flavor = "multi_thread")]
async fn anonymous_callers_ride_the_default_token() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/schemas/schema-7")
            .header("authorization", "Bearer fallback-jwt");
        then.status(200).json_body(json!({ "schemaId": "schema-7" }));
    });

    let dir = temp_mappings_dir();
    write_mapping(
        &dir,
        "schema_mapping.json",
        &retrieve_mapping("schema-7", &server.base_url()),
    );
    let mut config = config_for(&dir);
    config.authentication_enabled = true;
    config.default_token = Some("fallback-jwt".to_string());
    let dispatcher = dispatcher(config);

    // No credential at all.
    let response = dispatcher.dispatch(request(OP_RETRIEVE, "schema-7")).await;
    assert_eq!(response.status, ProtocolStatus::Ok);

    // An empty credential object counts as anonymous too.
    let mut empty_credential = request(OP_RETRIEVE, "schema-7");
    empty_credential.authentication = Some(json!({}));
    let response = dispatcher.dispatch(empty_credential).await;
    assert_eq!(response.status, ProtocolStatus::Ok);

    assert_eq!(mock.hits(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn caller_token_wins_over_the_default() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/schemas/schema-7")
            .header("authorization", "Bearer caller-jwt");
        then.status(200).json_body(json!({ "schemaId": "schema-7" }));
    });

    let dir = temp_mappings_dir();
    write_mapping(
        &dir,
        "schema_mapping.json",
        &retrieve_mapping("schema-7", &server.base_url()),
    );
    let mut config = config_for(&dir);
    config.authentication_enabled = true;
    config.default_token = Some("fallback-jwt".to_string());
    let dispatcher = dispatcher(config);

    let mut with_token = request(OP_RETRIEVE, "schema-7");
    with_token.authentication = Some(json!({ "token": "caller-jwt" }));
    let response = dispatcher.dispatch(with_token).await;

    assert_eq!(response.status, ProtocolStatus::Ok);
    mock.assert();
}

#[tokio::test(flavor = "multi_thread")]
async fn unparseable_credentials_are_rejected() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(GET).path("/schemas/schema-7");
        then.status(200).json_body(json!({ "schemaId": "schema-7" }));
    });

    let dir = temp_mappings_dir();
    write_mapping(
        &dir,
        "schema_mapping.json",
        &retrieve_mapping("schema-7", &server.base_url()),
    );
    let mut config = config_for(&dir);
    config.authentication_enabled = true;
    let dispatcher = dispatcher(config);

    let mut with_credential = request(OP_RETRIEVE, "schema-7");
    with_credential.authentication = Some(json!({ "user": "someone" }));
    let response = dispatcher.dispatch(with_credential).await;

    assert_eq!(response.status, ProtocolStatus::Unauthenticated);
    assert_eq!(
        response.message(),
        Some(
            "Unable to parse authentication. Currently, only JWT-based \
             authentication via 'token' attribute is supported."
        )
    );
    assert_eq!(mock.hits(), 0);
}

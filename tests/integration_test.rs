use std::fs;
use std::time::Duration;

use pretty_assertions::assert_eq;
use relaygate::error::{GatewayError, PlanError};
use relaygate::{FederationGateway, GatewayConfig, GraphQLRequest, MergedResponse};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP1_SDL: &str = r#"
type Query {
  hello: String
  user(id: ID!): User
  users: [User]
}

type Mutation {
  rename(id: ID!, name: String!): User
}

type User @key(fields: "id") {
  id: ID!
  name: String
}
"#;

const APP2_SDL: &str = r#"
type Query {
  get_name: String
  order: Order
  orders: [Order]
}

type Mutation {
  placeOrder: Order
}

type Order @key(fields: "id") {
  id: ID!
  user: User
}

extend type User @key(fields: "id") {
  id: ID! @external
}
"#;

// Two mocked subgraphs and a gateway configured against them
struct TestFixture {
    app1: MockServer,
    app2: MockServer,
    // Keeps the schema files alive for the lifetime of the test
    _dir: TempDir,
    gateway: FederationGateway,
}

impl TestFixture {
    async fn setup() -> Self {
        Self::setup_with("").await
    }

    // `extra` is appended to the generated gateway.yaml
    async fn setup_with(extra: &str) -> Self {
        let app1 = MockServer::start().await;
        let app2 = MockServer::start().await;

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("app1.graphql"), APP1_SDL).unwrap();
        fs::write(dir.path().join("app2.graphql"), APP2_SDL).unwrap();
        let config = format!(
            r#"
serviceList:
  - name: App1
    url: {}/graphql
    schemaFile: app1.graphql
  - name: App2
    url: {}/graphql
    schemaFile: app2.graphql
    headers:
      x-api-key: app2-key
{extra}
"#,
            app1.uri(),
            app2.uri()
        );
        let config_path = dir.path().join("gateway.yaml");
        fs::write(&config_path, config).unwrap();

        let config = GatewayConfig::from_file(&config_path).unwrap();
        let gateway = FederationGateway::from_config(&config).await.unwrap();

        TestFixture {
            app1,
            app2,
            _dir: dir,
            gateway,
        }
    }

    async fn execute_query(&self, query: &str) -> Result<MergedResponse, GatewayError> {
        self.gateway.handle_request(GraphQLRequest::new(query)).await
    }

    async fn request_count(&self) -> usize {
        self.app1.received_requests().await.unwrap().len()
            + self.app2.received_requests().await.unwrap().len()
    }
}

async fn respond(server: &MockServer, query: &str, body: Value, delay: Duration) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({ "query": query })))
        .respond_with(ResponseTemplate::new(200).set_body_json(body).set_delay(delay))
        .mount(server)
        .await;
}

const ORDER_QUERY: &str = "query { order { user { id } } }";
const USER_LOOKUP: &str = "query($_k0: ID!) { user(id: $_k0) { name } }";

#[tokio::test]
async fn test_entity_join_across_subgraphs() {
    let fixture = TestFixture::setup().await;
    respond(
        &fixture.app2,
        ORDER_QUERY,
        json!({ "data": { "order": { "user": { "id": "1" } } } }),
        Duration::ZERO,
    )
    .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "query": USER_LOOKUP, "variables": { "_k0": "1" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "user": { "name": "Ada" } }
        })))
        .expect(1)
        .mount(&fixture.app1)
        .await;

    let response = fixture.execute_query("{ order { user { name } } }").await.unwrap();

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "data": { "order": { "user": { "name": "Ada" } } }, "errors": [] })
    );
}

#[tokio::test]
async fn test_timed_out_subgraph_nulls_its_entity() {
    let fixture = TestFixture::setup_with("nodeTimeoutMs: 100").await;
    respond(
        &fixture.app2,
        ORDER_QUERY,
        json!({ "data": { "order": { "user": { "id": "1" } } } }),
        Duration::ZERO,
    )
    .await;
    respond(
        &fixture.app1,
        USER_LOOKUP,
        json!({ "data": { "user": { "name": "Ada" } } }),
        Duration::from_secs(2),
    )
    .await;

    let response = fixture.execute_query("{ order { user { name } } }").await.unwrap();

    assert_eq!(response.data, json!({ "order": { "user": null } }));
    assert_eq!(response.errors.len(), 1);
    let extensions = response.errors[0].extensions.as_ref().unwrap();
    assert_eq!(extensions["code"], json!("SUBREQUEST_TIMEOUT"));
    assert_eq!(extensions["service"], json!("App1"));
    assert!(response.errors[0].message.contains("timed out"));
}

#[tokio::test]
async fn test_unplannable_query_makes_no_subgraph_calls() {
    let fixture = TestFixture::setup().await;

    let err = fixture.execute_query("{ products { id } }").await.unwrap_err();

    assert!(matches!(err, GatewayError::Plan(PlanError::Unplannable(_))));
    assert_eq!(fixture.request_count().await, 0);
}

#[tokio::test]
async fn test_repeated_requests_are_identical() {
    let fixture = TestFixture::setup().await;
    respond(
        &fixture.app1,
        "query { hello }",
        json!({ "data": { "hello": "hello user" } }),
        Duration::ZERO,
    )
    .await;
    respond(
        &fixture.app2,
        "query { get_name }",
        json!({ "data": { "get_name": "user" } }),
        Duration::ZERO,
    )
    .await;

    let first = fixture.execute_query("{ hello get_name }").await.unwrap();
    let second = fixture.execute_query("{ hello get_name }").await.unwrap();

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.data, json!({ "hello": "hello user", "get_name": "user" }));
}

#[tokio::test]
async fn test_output_does_not_depend_on_completion_order() {
    let mut outputs = Vec::new();
    for (app1_delay, app2_delay) in [(200, 0), (0, 200)] {
        let fixture = TestFixture::setup().await;
        respond(
            &fixture.app1,
            "query { hello }",
            json!({ "data": { "hello": "hello user" }, "errors": [{ "message": "from App1" }] }),
            Duration::from_millis(app1_delay),
        )
        .await;
        respond(
            &fixture.app2,
            "query { get_name }",
            json!({ "data": { "get_name": "user" }, "errors": [{ "message": "from App2" }] }),
            Duration::from_millis(app2_delay),
        )
        .await;

        let response = fixture.execute_query("{ hello get_name }").await.unwrap();
        outputs.push(serde_json::to_string(&response).unwrap());
    }

    assert_eq!(outputs[0], outputs[1]);
    let response: Value = serde_json::from_str(&outputs[0]).unwrap();
    assert_eq!(response["errors"][0]["message"], json!("from App1"));
    assert_eq!(response["errors"][1]["message"], json!("from App2"));
    assert_eq!(response["errors"][1]["extensions"]["service"], json!("App2"));
}

#[tokio::test]
async fn test_failed_subgraph_only_nulls_its_fields() {
    let fixture = TestFixture::setup().await;
    respond(
        &fixture.app1,
        "query { hello }",
        json!({ "data": { "hello": "hello user" } }),
        Duration::ZERO,
    )
    .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fixture.app2)
        .await;

    let response = fixture.execute_query("{ hello get_name }").await.unwrap();

    assert_eq!(response.data, json!({ "hello": "hello user", "get_name": null }));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].extensions.as_ref().unwrap()["code"],
        json!("SUBREQUEST_HTTP_ERROR")
    );
}

#[tokio::test]
async fn test_all_root_nodes_failing_yields_null_data() {
    let fixture = TestFixture::setup().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&fixture.app2)
        .await;

    let response = fixture.execute_query("{ order { user { name } } }").await.unwrap();

    assert_eq!(response.data, Value::Null);
    let codes: Vec<_> = response
        .errors
        .iter()
        .map(|error| error.extensions.as_ref().unwrap()["code"].clone())
        .collect();
    assert_eq!(codes, vec![json!("SUBREQUEST_HTTP_ERROR"), json!("DEPENDENCY_FAILED")]);
    assert!(fixture.app1.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subgraph_headers_are_sent() {
    let fixture = TestFixture::setup().await;
    respond(
        &fixture.app2,
        "query { get_name }",
        json!({ "data": { "get_name": "user" } }),
        Duration::ZERO,
    )
    .await;

    fixture.execute_query("{ get_name }").await.unwrap();

    let requests = fixture.app2.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("x-api-key").and_then(|v| v.to_str().ok()),
        Some("app2-key")
    );
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_retry_policy_recovers_from_transient_failures() {
    let fixture = TestFixture::setup_with("retry:\n  policy: fixed\n  retries: 2\n  delayMs: 10").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&fixture.app1)
        .await;
    respond(
        &fixture.app1,
        "query { hello }",
        json!({ "data": { "hello": "hello user" } }),
        Duration::ZERO,
    )
    .await;

    let response = fixture.execute_query("{ hello }").await.unwrap();

    assert_eq!(response.data, json!({ "hello": "hello user" }));
    assert!(response.errors.is_empty());
    assert_eq!(fixture.app1.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_subgraph_validation_errors_are_reported_not_retried() {
    let fixture = TestFixture::setup_with("retry:\n  policy: fixed\n  retries: 2\n  delayMs: 10").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errors": [{ "message": "Cannot query field \"hello\" on type \"Query\"." }]
        })))
        .mount(&fixture.app1)
        .await;

    let response = fixture.execute_query("{ hello }").await.unwrap();

    assert_eq!(response.data, json!({ "hello": null }));
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].message,
        "Cannot query field \"hello\" on type \"Query\"."
    );
    assert_eq!(response.errors[0].extensions.as_ref().unwrap()["service"], json!("App1"));
    assert_eq!(fixture.app1.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_mutations_run_one_after_another() {
    let fixture = TestFixture::setup().await;
    respond(
        &fixture.app1,
        r#"mutation { first: rename(id: "1", name: "Ada") { name } }"#,
        json!({ "data": { "first": { "name": "Ada" } } }),
        Duration::from_millis(100),
    )
    .await;
    respond(
        &fixture.app2,
        "mutation { placeOrder { id } }",
        json!({ "data": { "placeOrder": { "id": "o1" } } }),
        Duration::ZERO,
    )
    .await;
    respond(
        &fixture.app1,
        r#"mutation { second: rename(id: "2", name: "Bob") { name } }"#,
        json!({ "data": { "second": { "name": "Bob" } } }),
        Duration::ZERO,
    )
    .await;

    let response = fixture
        .execute_query(
            r#"mutation {
                first: rename(id: "1", name: "Ada") { name }
                placeOrder { id }
                second: rename(id: "2", name: "Bob") { name }
            }"#,
        )
        .await
        .unwrap();

    assert_eq!(
        serde_json::to_string(&response.data).unwrap(),
        r#"{"first":{"name":"Ada"},"placeOrder":{"id":"o1"},"second":{"name":"Bob"}}"#
    );
    let app1_queries: Vec<String> = fixture
        .app1
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|request| request.body_json::<Value>().unwrap()["query"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        app1_queries,
        vec![
            r#"mutation { first: rename(id: "1", name: "Ada") { name } }"#.to_string(),
            r#"mutation { second: rename(id: "2", name: "Bob") { name } }"#.to_string(),
        ]
    );
}

#[test]
fn test_bundled_configuration_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/gateway.yaml");
    let config = GatewayConfig::from_file(path).unwrap();

    let names: Vec<_> = config.service_list.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["App 2", "App 1"]);
    assert_eq!(
        config.introspection_headers.get("Authorization").map(String::as_str),
        Some("Bearer abc123")
    );
    assert!(
        config
            .service_list
            .iter()
            .all(|service| config.schema_path(service).is_some_and(|path| path.exists()))
    );
}

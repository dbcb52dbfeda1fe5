// Integration tests for the HTTP requester pipeline
//
// Covers placeholder substitution, retry behavior, extraction chaining
// and auth header injection against a local mock server.

use fusillade_config::{Config, EndpointConfig, ExtractorConfig, ExtractorKind, FeederConfig};
use fusillade_engine::auth::StaticBearer;
use fusillade_engine::feeder::CsvFeeder;
use fusillade_engine::http::HttpRequester;
use fusillade_engine::logging::FailureLog;
use fusillade_engine::retry::{Retry, RetryPolicy};
use fusillade_engine::select::EndpointSelect;
use fusillade_engine::{AttemptContext, Endpoint, EngineError, Requester};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ctx() -> AttemptContext {
    AttemptContext::new(CancellationToken::new(), Duration::from_secs(5))
}

fn single_endpoint_config(url: String) -> Config {
    Config {
        target: Some(url),
        ..Config::default()
    }
}

fn bound_ctx(config: &Config) -> AttemptContext {
    let table = Endpoint::table_from_config(config).unwrap();
    let ctx = ctx();
    ctx.bind_endpoint(table[0].clone());
    ctx
}

#[tokio::test]
async fn test_placeholder_defaults_and_feeder_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/u/anon/o/7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "oid\n7").unwrap();
    csv.flush().unwrap();

    let config = single_endpoint_config(format!("{}/u/{{{{uid|anon}}}}/o/{{{{oid}}}}", server.uri()));
    let feeder = Arc::new(CsvFeeder::open(csv.path()).unwrap());
    let requester = HttpRequester::new(&config, Some(feeder), None).unwrap();

    let report = requester.attempt(&bound_ctx(&config)).await.unwrap();
    assert_eq!(report.status_bucket, "200");
}

#[tokio::test]
async fn test_retry_on_503_hits_server_three_times() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = single_endpoint_config(format!("{}/flaky", server.uri()));
    config.retries = 3;
    config.retry_backoff.base_ms = 1;
    config.retry_backoff.max_delay_ms = 5;

    let terminal = Arc::new(HttpRequester::new(&config, None, None).unwrap());
    let policy = RetryPolicy {
        max_attempts: config.retries + 1,
        base: Duration::from_millis(config.retry_backoff.base_ms),
        max_delay: Duration::from_millis(config.retry_backoff.max_delay_ms),
    };
    let chain = Retry::new(policy, Arc::new(FailureLog::new(terminal)));

    let report = chain.attempt(&bound_ctx(&config)).await.unwrap();
    assert_eq!(report.status_bucket, "200");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_non_retryable_404_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = single_endpoint_config(format!("{}/gone", server.uri()));
    config.retries = 3;

    let terminal = Arc::new(HttpRequester::new(&config, None, None).unwrap());
    let chain = Retry::new(
        RetryPolicy {
            max_attempts: 4,
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        terminal,
    );

    let err = chain.attempt(&bound_ctx(&config)).await.unwrap_err();
    match err {
        EngineError::TransportStatus { status, snippet } => {
            assert_eq!(status, 404);
            assert_eq!(snippet, "missing");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_extraction_chains_into_next_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"session": {"token": "tok-1"}}"#),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orders/tok-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.endpoints = vec![
        EndpointConfig {
            name: "login".to_string(),
            weight: 1,
            url: format!("{}/login", server.uri()),
            method: None,
            headers: Default::default(),
            body: None,
            body_file: None,
            extractors: vec![ExtractorConfig {
                name: "token".to_string(),
                kind: ExtractorKind::Jsonpath,
                expr: "session.token".to_string(),
                on_error: false,
            }],
        },
        EndpointConfig {
            name: "orders".to_string(),
            weight: 1,
            url: format!("{}/orders/{{{{token}}}}", server.uri()),
            method: None,
            headers: Default::default(),
            body: None,
            body_file: None,
            extractors: Vec::new(),
        },
    ];

    let table = Endpoint::table_from_config(&config).unwrap();
    let requester = HttpRequester::new(&config, None, None).unwrap();

    // Same worker scope across two logical calls
    let scope = Arc::new(fusillade_engine::VariableScope::new());

    let login_ctx = AttemptContext::with_scope(
        CancellationToken::new(),
        Duration::from_secs(5),
        scope.clone(),
    );
    login_ctx.bind_endpoint(table[0].clone());
    requester.attempt(&login_ctx).await.unwrap();
    assert_eq!(scope.get("token").as_deref(), Some("tok-1"));

    let orders_ctx = AttemptContext::with_scope(
        CancellationToken::new(),
        Duration::from_secs(5),
        scope.clone(),
    );
    orders_ctx.bind_endpoint(table[1].clone());
    let report = requester.attempt(&orders_ctx).await.unwrap();
    assert_eq!(report.status_bucket, "200");
}

#[tokio::test]
async fn test_static_bearer_header_injected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer sekrit"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = single_endpoint_config(format!("{}/private", server.uri()));
    let auth = Arc::new(StaticBearer::new("sekrit".to_string()));
    let requester = HttpRequester::new(&config, None, Some(auth)).unwrap();

    requester.attempt(&bound_ctx(&config)).await.unwrap();
}

#[tokio::test]
async fn test_selection_binds_endpoint_across_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/only"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.endpoints = vec![EndpointConfig {
        name: "only".to_string(),
        weight: 1,
        url: format!("{}/only", server.uri()),
        method: None,
        headers: Default::default(),
        body: None,
        body_file: None,
        extractors: Vec::new(),
    }];

    let table = Endpoint::table_from_config(&config).unwrap();
    let terminal = Arc::new(HttpRequester::new(&config, None, None).unwrap());
    let retry = Arc::new(Retry::new(
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        terminal,
    ));
    let chain = EndpointSelect::new(table, retry).unwrap();

    let call_ctx = ctx();
    let err = chain.attempt(&call_ctx).await.unwrap_err();
    assert!(matches!(err, EngineError::TransportStatus { status: 500, .. }));
    // All three attempts went to the single bound endpoint
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(call_ctx.bound_endpoint().unwrap().name, "only");
}

#[tokio::test]
async fn test_json_feeder_exhaustion_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mut json = tempfile::NamedTempFile::new().unwrap();
    write!(json, r#"[{{"id": "1"}}]"#).unwrap();
    json.flush().unwrap();

    let config = single_endpoint_config(format!("{}/x/{{{{id}}}}", server.uri()));
    let feeder = fusillade_engine::feeder::from_config(&FeederConfig::Json {
        path: json.path().to_path_buf(),
    })
    .unwrap();
    let requester = HttpRequester::new(&config, Some(feeder), None).unwrap();

    requester.attempt(&bound_ctx(&config)).await.unwrap();
    let err = requester.attempt(&bound_ctx(&config)).await.unwrap_err();
    assert!(matches!(err, EngineError::FeederExhausted));
}

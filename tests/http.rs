//! End-to-end tests of the REST facade against stubbed providers.

use axum::http::header::{ETAG, IF_MATCH, IF_UNMODIFIED_SINCE, LAST_MODIFIED, LOCATION};
use axum::http::StatusCode;
use axum_test::TestServer;
use icvsb::benchmark::client::BenchmarkedRequestClient;
use icvsb::db::models::Service;
use icvsb::providers::stub::StubProvider;
use icvsb::providers::LabelProvider;
use icvsb::types::ClientId;
use icvsb::{build_router, AppState, Config, ProviderFactory};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// App state whose provider factory hands out the given stubs in creation
/// order, then falls back to a fresh deterministic stub per service.
fn test_state(pool: SqlitePool, providers: Vec<Arc<dyn LabelProvider>>) -> AppState {
    let store = icvsb::db::from_pool(pool, true);
    let queue = Arc::new(Mutex::new(VecDeque::from(providers)));
    let factory: ProviderFactory = Arc::new(move |service: Service| {
        let mut queue = queue.lock().unwrap();
        Ok(queue
            .pop_front()
            .unwrap_or_else(|| Arc::new(StubProvider::new(service).push(&[("cat", 0.9)]))))
    });
    AppState::new(store, Config::for_tests(), CancellationToken::new()).with_provider_factory(factory)
}

fn server(state: AppState) -> TestServer {
    TestServer::new(build_router(state)).expect("router builds")
}

async fn create_client(server: &TestServer, state: &AppState, body: Value) -> (ClientId, Arc<BenchmarkedRequestClient>) {
    let response = server.post("/benchmark").json(&body).await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let id = ClientId(response.json::<Value>()["id"].as_i64().unwrap());
    let client = state.registry.get(id).await.expect("client registered");
    (id, client)
}

fn etag(client: ClientId, key: Option<i64>) -> String {
    match key {
        Some(key) => format!("W/\"{client};{key}\""),
        None => format!("W/\"{client}\""),
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn landing_page_and_healthz(pool: SqlitePool) {
    let server = server(test_state(pool, vec![]));

    let response = server.get("/").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.text().contains("icvsb"));

    let response = server.get("/healthz").await;
    assert_eq!(response.text(), "OK");
}

#[sqlx::test(migrations = "./migrations")]
async fn create_benchmark_rejects_invalid_configuration(pool: SqlitePool) {
    let server = server(test_state(pool, vec![]));
    let dataset = json!(["https://example.com/u1.jpg"]);

    for body in [
        json!({ "service": "clarifai", "benchmark_dataset": dataset.clone() }),
        json!({ "service": "google", "benchmark_dataset": dataset.clone(), "severity": "fatal" }),
        json!({ "service": "google", "benchmark_dataset": dataset.clone(), "trigger_on_schedule": "whenever" }),
        json!({ "service": "google", "benchmark_dataset": ["not a uri"] }),
        json!({ "service": "google", "benchmark_dataset": dataset, "severity": "warning" }),
        json!({ "service": "google" }),
    ] {
        let response = server.post("/benchmark").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "body: {body}");
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn first_benchmark_isolation(pool: SqlitePool) {
    // Scenario: a freshly created client with autobenchmark off has no key,
    // is not benchmarking, and answers conditional requests with NO_KEY_YET.
    let state = test_state(pool, vec![]);
    let server = server(state.clone());

    let (id, _) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg", "https://example.com/u2.jpg"],
            "autobenchmark": false
        }),
    )
    .await;

    let info = server.get(&format!("/benchmark/{id}")).await.json::<Value>();
    assert_eq!(info["current_key_id"], Value::Null);
    assert_eq!(info["is_benchmarking"], json!(false));
    assert_eq!(info["benchmark_count"], json!(0));

    // The key redirect is unavailable while no key exists.
    let response = server.get(&format!("/benchmark/{id}/key")).await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

    // Mint a key on a second client to supply in If-Match.
    let (_, minter) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg", "https://example.com/u2.jpg"],
            "autobenchmark": false
        }),
    )
    .await;
    let supplied = minter.benchmark().await.unwrap();

    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/u3.jpg")
        .add_header(IF_MATCH, etag(id, Some(*supplied.id())))
        .await;
    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(response.json::<Value>()["key_error"]["kind"], "NO_KEY_YET");
}

#[sqlx::test(migrations = "./migrations")]
async fn introspection_after_first_benchmark(pool: SqlitePool) {
    let state = test_state(pool, vec![]);
    let server = server(state.clone());

    let (id, client) = create_client(
        &server,
        &state,
        json!({
            "service": "amazon",
            "benchmark_dataset": ["https://example.com/u1.jpg"],
            "autobenchmark": false
        }),
    )
    .await;
    let key = client.benchmark().await.unwrap();

    let info = server.get(&format!("/benchmark/{id}")).await.json::<Value>();
    assert_eq!(info["current_key_id"], json!(*key.id()));
    assert_eq!(info["benchmark_count"], json!(1));
    assert_eq!(info["service"], "amazon");
    assert!(info["last_benchmark_time"].is_string());
    assert_eq!(info["config"]["max_labels"], json!(100));
    assert_eq!(info["benchmark_dataset"][0], "https://example.com/u1.jpg");

    let response = server.get(&format!("/benchmark/{id}/key")).await;
    assert_eq!(response.status_code(), StatusCode::FOUND);
    let location = response.headers().get(LOCATION).unwrap().to_str().unwrap().to_string();
    assert_eq!(location, format!("/key/{}", key.id()));

    let key_info = server.get(&location).await.json::<Value>();
    assert_eq!(key_info["id"], json!(*key.id()));
    assert_eq!(key_info["service"], "amazon");
    assert_eq!(key_info["expired"], json!(false));
    assert_eq!(key_info["responses"]["https://example.com/u1.jpg"]["labels"]["cat"], json!(0.9));

    let log = server.get(&format!("/benchmark/{id}/log")).await;
    assert_eq!(log.status_code(), StatusCode::OK);
    assert!(log.text().contains("benchmark complete"));

    // Unknown ids are validation failures.
    let response = server.get("/benchmark/999").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let response = server.get("/key/999").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn conditional_labels_200_then_304(pool: SqlitePool) {
    let state = test_state(pool, vec![]);
    let server = server(state.clone());

    let (id, client) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg"],
            "severity": "none",
            "autobenchmark": false
        }),
    )
    .await;
    let key = client.benchmark().await.unwrap();
    let if_match = etag(id, Some(*key.id()));

    let first = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/fresh.jpg")
        .add_header(IF_MATCH, if_match.clone())
        .await;
    assert_eq!(first.status_code(), StatusCode::OK);
    let body = first.json::<Value>();
    assert_eq!(body["labels"]["cat"], json!(0.9));
    assert_eq!(first.headers().get(ETAG).unwrap().to_str().unwrap(), if_match);
    let last_modified = first.headers().get(LAST_MODIFIED).unwrap().to_str().unwrap();
    assert!(icvsb::validate::http_date(last_modified).is_ok());

    // Byte-identical repeat under the same key answers 304.
    let second = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/fresh.jpg")
        .add_header(IF_MATCH, if_match.clone())
        .await;
    assert_eq!(second.status_code(), StatusCode::NOT_MODIFIED);
    assert_eq!(second.headers().get(ETAG).unwrap().to_str().unwrap(), if_match);
}

#[sqlx::test(migrations = "./migrations")]
async fn exception_severity_hides_labels_in_412(pool: SqlitePool) {
    // Scenario: a key whose expected labels never arrive, under
    // severity=exception, must answer 412 without any label material.
    let state = test_state(pool, vec![]);
    let server = server(state.clone());

    let (id, client) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg"],
            "severity": "exception",
            "expected_labels": ["unicorn"],
            "autobenchmark": false
        }),
    )
    .await;
    let key = client.benchmark().await.unwrap();

    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, etag(id, Some(*key.id())))
        .await;
    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);
    let body = response.json::<Value>();
    assert_eq!(body["response_error"]["kind"], "EXPECTED_LABELS_MISMATCH");
    assert!(body.get("labels").is_none());
    assert!(body.get("response").is_none());
}

#[sqlx::test(migrations = "./migrations")]
async fn provider_outage_maps_to_422(pool: SqlitePool) {
    let stub = Arc::new(StubProvider::new(Service::Google).push(&[("cat", 0.9)]));
    let state = test_state(pool, vec![stub.clone() as Arc<dyn LabelProvider>]);
    let server = server(state.clone());

    let (id, client) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg"],
            "severity": "none",
            "autobenchmark": false
        }),
    )
    .await;
    let key = client.benchmark().await.unwrap();

    stub.fail_from_now_on();
    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, etag(id, Some(*key.id())))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response.json::<Value>();
    assert!(body["response"]["service_error"].as_str().unwrap().contains("stubbed outage"));
}

#[sqlx::test(migrations = "./migrations")]
async fn if_unmodified_since_selects_the_right_key(pool: SqlitePool) {
    // Three keys at T1 < T2 < T3, where T2's labels drifted from both
    // neighbours. Selecting T2 must validate against the key minted at T2,
    // not the one at T3.
    let drifted: &[(&str, f64)] = &[
        ("cat", 0.9),
        ("dog", 0.8),
        ("bird", 0.7),
        ("fish", 0.6),
        ("ant", 0.5),
        ("bee", 0.4),
    ];
    let stub: Arc<dyn LabelProvider> = Arc::new(
        StubProvider::new(Service::Google)
            .push(&[("cat", 0.9)])
            .push(drifted)
            .push(&[("cat", 0.9)]),
    );
    let state = test_state(pool, vec![stub]);
    let server = server(state.clone());

    let (id, client) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg"],
            "severity": "none",
            "delta_labels": 2,
            "autobenchmark": false
        }),
    )
    .await;

    // HTTP-dates carry second resolution, so space the mints out.
    let k1 = client.benchmark().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let k2 = client.benchmark().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let k3 = client.benchmark().await.unwrap();
    assert_ne!(k1.id(), k2.id());
    assert_ne!(k2.id(), k3.id());

    // T2 selects the drifted key, which the current key rejects.
    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, etag(id, None))
        .add_header(IF_UNMODIFIED_SINCE, icvsb::validate::format_http_date(k2.created_at()))
        .await;
    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);
    assert_eq!(response.json::<Value>()["key_error"]["kind"], "LABEL_DELTA_MISMATCH");

    // T3 selects the current key and labels normally.
    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, etag(id, None))
        .add_header(IF_UNMODIFIED_SINCE, icvsb::validate::format_http_date(k3.created_at()))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // A date before every key selects nothing.
    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, etag(id, None))
        .add_header(
            IF_UNMODIFIED_SINCE,
            icvsb::validate::format_http_date(k1.created_at() - chrono::Duration::seconds(10)),
        )
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn first_error_free_etag_wins(pool: SqlitePool) {
    let drifted: &[(&str, f64)] = &[
        ("cat", 0.9),
        ("dog", 0.8),
        ("bird", 0.7),
        ("fish", 0.6),
        ("ant", 0.5),
        ("bee", 0.4),
    ];
    let stub: Arc<dyn LabelProvider> = Arc::new(
        StubProvider::new(Service::Google)
            .push(&[("cat", 0.9)])
            .push(drifted),
    );
    let state = test_state(pool, vec![stub]);
    let server = server(state.clone());

    let (id, client) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg"],
            "severity": "none",
            "delta_labels": 2,
            "autobenchmark": false
        }),
    )
    .await;

    let old_key = client.benchmark().await.unwrap();
    let new_key = client.benchmark().await.unwrap();
    assert_ne!(old_key.id(), new_key.id());

    // The expired key fails validation; the list falls through to the
    // current key, whose outcome is error-free.
    let if_match = format!("{}, {}", etag(id, Some(*old_key.id())), etag(id, Some(*new_key.id())));
    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, if_match)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(
        response.headers().get(ETAG).unwrap().to_str().unwrap(),
        etag(id, Some(*new_key.id()))
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn labels_requires_if_match_and_a_valid_uri(pool: SqlitePool) {
    let server = server(test_state(pool, vec![]));

    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .get("/labels")
        .add_query_param("uri", "not a uri")
        .add_header(IF_MATCH, "W/\"1;1\"")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Strong ETags are rejected outright.
    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, "\"1;1\"")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "./migrations")]
async fn warning_severity_posts_the_outcome_to_the_callback(pool: SqlitePool) {
    let sink = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .respond_with(wiremock::ResponseTemplate::new(200))
        .mount(&sink)
        .await;

    let state = test_state(pool, vec![]);
    let server = server(state.clone());

    let (id, client) = create_client(
        &server,
        &state,
        json!({
            "service": "google",
            "benchmark_dataset": ["https://example.com/u1.jpg"],
            "severity": "warning",
            "expected_labels": ["unicorn"],
            "warning_callback_uri": sink.uri(),
            "autobenchmark": false
        }),
    )
    .await;
    let key = client.benchmark().await.unwrap();

    let response = server
        .get("/labels")
        .add_query_param("uri", "https://example.com/q.jpg")
        .add_header(IF_MATCH, etag(id, Some(*key.id())))
        .await;
    // Warning severity still returns the full result to the caller.
    assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);
    assert!(response.json::<Value>().get("labels").is_some());

    // The webhook fires on a detached task; wait for it to land.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let received = sink.received_requests().await.unwrap_or_default();
        if let Some(request) = received.first() {
            let payload: Value = serde_json::from_slice(&request.body).unwrap();
            assert_eq!(payload["benchmark_client_id"], json!(*id));
            assert_eq!(payload["result"]["response_error"]["kind"], "EXPECTED_LABELS_MISMATCH");
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "warning callback never arrived");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

//! Route handlers for the REST facade.

use crate::api::conditional;
use crate::api::models::{BenchmarkInfo, CreateBenchmark, CreatedBenchmark, KeyInfo, LabelsQuery};
use crate::benchmark::key::Key;
use crate::errors::Error;
use crate::providers::ProviderError;
use crate::types::{ClientId, KeyId};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;

/// GET / - static landing page.
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

/// GET /healthz - liveness.
pub async fn healthz() -> &'static str {
    "OK"
}

/// POST /benchmark - create a benchmark client.
///
/// The client is inserted into the registry synchronously; when
/// `autobenchmark` is set the first benchmark runs on a detached task, so
/// the 201 returns before the dataset fan-out completes.
pub async fn create_benchmark(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<CreatedBenchmark>), Error> {
    let request = CreateBenchmark::from_value(&body)?;
    request.config.validate(&request.benchmark_dataset)?;

    let provider = (state.provider_factory)(request.service).map_err(|e| match e {
        ProviderError::MissingCredential(var) => Error::bad_request(format!("{var} must be set to use {}", request.service)),
        other => Error::bad_request(other.to_string()),
    })?;

    let client = state
        .registry
        .create(request.benchmark_dataset, request.config, state.store.clone(), provider)
        .await;

    tracing::info!(id = %client.id(), service = %client.service(), "created benchmark client");
    Ok((StatusCode::CREATED, Json(CreatedBenchmark { id: client.id() })))
}

/// GET /benchmark/:id - client introspection.
pub async fn get_benchmark(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<BenchmarkInfo>, Error> {
    let id = ClientId(id);
    let client = state.registry.get(id).await.ok_or(Error::UnknownBenchmarkClient(id))?;

    Ok(Json(BenchmarkInfo {
        id: client.id(),
        service: client.service(),
        created_at: client.created_at(),
        current_key_id: client.current_key().await.map(|k| k.id()),
        is_benchmarking: client.benchmarking(),
        invalid_state_count: client.invalid_state_count(),
        last_benchmark_time: client.last_benchmark_time(),
        benchmark_count: client.benchmark_count(),
        config: client.config().clone(),
        benchmark_dataset: client.dataset().to_vec(),
    }))
}

/// GET /benchmark/:id/key - 302 to the current key, 422 while the first
/// benchmark is still running.
pub async fn get_benchmark_key(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Response, Error> {
    let id = ClientId(id);
    let client = state.registry.get(id).await.ok_or(Error::UnknownBenchmarkClient(id))?;
    let key = client.current_key().await.ok_or(Error::NoKeyYet(id))?;

    let location = format!("/key/{}", key.id());
    Ok((
        StatusCode::FOUND,
        [(LOCATION, location)],
    )
        .into_response())
}

/// GET /benchmark/:id/log - plain-text per-client log.
pub async fn get_benchmark_log(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Response, Error> {
    let id = ClientId(id);
    let client = state.registry.get(id).await.ok_or(Error::UnknownBenchmarkClient(id))?;
    Ok((
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        client.log().render(),
    )
        .into_response())
}

/// GET /key/:id - key introspection.
pub async fn get_key(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<KeyInfo>, Error> {
    let id = KeyId(id);
    let record = state.store.key(id).await?.ok_or(Error::UnknownKey(id))?;
    let key = Key::load(&state.store, record).await?;
    Ok(Json(KeyInfo::from(&key)))
}

/// GET /labels?uri=... - conditional labeling.
pub async fn get_labels(
    State(state): State<AppState>,
    Query(query): Query<LabelsQuery>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    conditional::labels(&state, &query.uri, &headers).await
}

//! Conditional-request machinery for `GET /labels`.
//!
//! `If-Match` carries one or more weak ETags of the form
//! `W/"<client-id>[;<key-id>]"`. Entries are tried in order; the first
//! error-free outcome (or the last entry's outcome) decides the response.
//! An entry without a key id selects the client's most recent key at or
//! before `If-Unmodified-Since`.

use crate::benchmark::client::Outcome;
use crate::benchmark::key::Key;
use crate::errors::Error;
use crate::types::{ClientId, KeyId};
use crate::validate;
use crate::AppState;
use axum::http::header::{ETAG, IF_MATCH, IF_UNMODIFIED_SINCE, LAST_MODIFIED};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// One parsed `If-Match` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EtagRef {
    pub client: ClientId,
    pub key: Option<KeyId>,
}

/// Parse every weak ETag out of the `If-Match` header(s).
pub fn parse_if_match(headers: &HeaderMap) -> Result<Vec<EtagRef>, Error> {
    let mut refs = Vec::new();
    for value in headers.get_all(IF_MATCH) {
        let value = value
            .to_str()
            .map_err(|_| Error::bad_request("If-Match header is not valid UTF-8"))?;
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let inner = token
                .strip_prefix("W/\"")
                .and_then(|t| t.strip_suffix('"'))
                .ok_or_else(|| Error::bad_request("If-Match entries must be weak ETags of the form W/\"<id>[;<key>]\""))?;
            let mut parts = inner.splitn(2, ';');
            let client = ClientId(validate::integer(parts.next().unwrap_or(""))?);
            let key = match parts.next() {
                Some(raw) => Some(KeyId(validate::integer(raw)?)),
                None => None,
            };
            refs.push(EtagRef { client, key });
        }
    }
    if refs.is_empty() {
        return Err(Error::bad_request("If-Match header is required"));
    }
    Ok(refs)
}

/// Bounded cache of `/labels` response bodies keyed by
/// `(client id, key id, uri)`, backing the 304 path. Advisory only: an
/// evicted entry costs a 200 instead of a 304, never a wrong answer.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

type CacheKey = (ClientId, KeyId, String);

struct CacheInner {
    entries: HashMap<CacheKey, Vec<u8>>,
    order: VecDeque<CacheKey>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    /// Record `body` under `key`; returns true when an identical body was
    /// already cached, i.e. the caller should answer 304.
    pub fn check_and_store(&self, key: CacheKey, body: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.get(&key).is_some_and(|prev| prev == body) {
            return true;
        }
        if !inner.entries.contains_key(&key) {
            inner.order.push_back(key.clone());
            if inner.order.len() > self.capacity {
                if let Some(evicted) = inner.order.pop_front() {
                    inner.entries.remove(&evicted);
                }
            }
        }
        inner.entries.insert(key, body.to_vec());
        false
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Run the conditional `/labels` flow.
pub async fn labels(state: &AppState, uri: &str, headers: &HeaderMap) -> Result<Response, Error> {
    validate::uri(uri)?;
    let etags = parse_if_match(headers)?;

    let unmodified_since = match headers.get(IF_UNMODIFIED_SINCE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| Error::bad_request("If-Unmodified-Since header is not valid UTF-8"))?;
            Some(validate::http_date(value)?)
        }
        None => None,
    };

    let mut used = None;
    for etag in &etags {
        let client = state
            .registry
            .get(etag.client)
            .await
            .ok_or(Error::UnknownBenchmarkClient(etag.client))?;

        let supplied: Arc<Key> = match etag.key {
            Some(key_id) => {
                let record = state.store.key(key_id).await?.ok_or(Error::UnknownKey(key_id))?;
                Arc::new(Key::load(&state.store, record).await?)
            }
            None => {
                let ts = unmodified_since.ok_or_else(|| {
                    Error::bad_request("If-Unmodified-Since is required when an If-Match entry omits the key id")
                })?;
                client.key_at_or_before(ts).await.ok_or_else(|| {
                    Error::bad_request(format!("benchmark client {} has no key at or before the given date", etag.client))
                })?
            }
        };

        let outcome = client.send_uri_with_key(uri, &supplied).await?;
        let error_free = outcome.is_error_free();
        used = Some((client, outcome));
        if error_free {
            break;
        }
    }

    let (client, outcome) = used.expect("parse_if_match yields at least one entry");
    Ok(respond(state, &client, outcome, uri).await)
}

async fn respond(
    state: &AppState,
    client: &Arc<crate::benchmark::client::BenchmarkedRequestClient>,
    outcome: Outcome,
    uri: &str,
) -> Response {
    let current = client.current_key().await;

    let mut headers = HeaderMap::new();
    let etag = match &current {
        Some(key) => format!("W/\"{};{}\"", client.id(), key.id()),
        None => format!("W/\"{}\"", client.id()),
    };
    if let Ok(value) = etag.parse() {
        headers.insert(ETAG, value);
    }
    if let Some(key) = &current {
        if let Ok(value) = validate::format_http_date(key.created_at()).parse() {
            headers.insert(LAST_MODIFIED, value);
        }
    }

    if outcome.key_error.is_some() || outcome.response_error.is_some() {
        return (StatusCode::PRECONDITION_FAILED, headers, axum::Json(outcome)).into_response();
    }
    if outcome.service_error().is_some() {
        return (StatusCode::UNPROCESSABLE_ENTITY, headers, axum::Json(outcome)).into_response();
    }

    let body = match serde_json::to_vec(&outcome) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("failed to serialize labels outcome: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, headers).into_response();
        }
    };

    // An error-free outcome implies a current key existed when the request
    // was validated; re-benchmarking in between at worst skips the 304.
    if let Some(key) = &current {
        if state
            .labels_cache
            .check_and_store((client.id(), key.id(), uri.to_string()), &body)
        {
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }
    }

    let mut response = (StatusCode::OK, headers, body).into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        axum::http::HeaderValue::from_static("application/json;charset=utf-8"),
    );
    response
}

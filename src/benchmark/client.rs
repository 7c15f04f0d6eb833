//! The benchmarked request client: key lifecycle, conditional dispatch, and
//! severity-shaped outcomes.

use crate::benchmark::key::{InvalidKeyError, Key};
use crate::client::RequestClient;
use crate::db::models::{Service, Severity};
use crate::db::store::KeyInsert;
use crate::db::{DbError, Result, Store};
use crate::logging::ClientLog;
use crate::providers::LabelProvider;
use crate::types::{ClientId, KeyId};
use crate::validate::{self, ValidationError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-client configuration, all fields defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub max_labels: u32,
    pub min_confidence: f64,
    pub delta_labels: u32,
    pub delta_confidence: f64,
    pub severity: Severity,
    pub expected_labels: Vec<String>,
    pub trigger_on_schedule: String,
    pub trigger_on_failcount: u32,
    pub benchmark_callback_uri: Option<String>,
    pub warning_callback_uri: Option<String>,
    pub autobenchmark: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            max_labels: 100,
            min_confidence: 0.50,
            delta_labels: 5,
            delta_confidence: 0.01,
            severity: Severity::Info,
            expected_labels: Vec::new(),
            trigger_on_schedule: "0 0 * * 0".to_string(),
            trigger_on_failcount: 0,
            benchmark_callback_uri: None,
            warning_callback_uri: None,
            autobenchmark: true,
        }
    }
}

impl BenchmarkConfig {
    /// Validate the configuration together with its benchmark dataset.
    pub fn validate(&self, dataset: &[String]) -> std::result::Result<(), ValidationError> {
        validate::cron_line(&self.trigger_on_schedule)?;
        for uri in dataset {
            validate::uri(uri)?;
        }
        if self.max_labels == 0 {
            return Err(ValidationError::NotInteger("max_labels: 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ValidationError::NotPositiveFloat(format!("min_confidence: {}", self.min_confidence)));
        }
        if !(0.0..=1.0).contains(&self.delta_confidence) {
            return Err(ValidationError::NotPositiveFloat(format!(
                "delta_confidence: {}",
                self.delta_confidence
            )));
        }
        if self.severity == Severity::Warning && self.warning_callback_uri.is_none() {
            return Err(ValidationError::MissingWarningCallback);
        }
        if let Some(uri) = &self.benchmark_callback_uri {
            validate::uri(uri)?;
        }
        if let Some(uri) = &self.warning_callback_uri {
            validate::uri(uri)?;
        }
        Ok(())
    }
}

/// A key-path error in an [`Outcome`]: either there is no reference key yet,
/// or validation failed with one of the drift reasons.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeError {
    NoKeyYet,
    Invalid(InvalidKeyError),
}

impl Serialize for OutcomeError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            OutcomeError::NoKeyYet => serde_json::json!({ "kind": "NO_KEY_YET" }).serialize(serializer),
            OutcomeError::Invalid(err) => err.serialize(serializer),
        }
    }
}

impl fmt::Display for OutcomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeError::NoKeyYet => f.write_str("no benchmark key has been minted yet"),
            OutcomeError::Invalid(err) => err.fmt(f),
        }
    }
}

/// The encoded response included in an [`Outcome`].
///
/// Deliberately carries no row ids or timestamps: the `/labels` 304 path
/// compares serialized outcomes byte-for-byte, and two calls that produced
/// identical vendor behavior must serialize identically.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseInfo {
    pub uri: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_error: Option<String>,
    pub body: serde_json::Value,
}

/// The shaped result of `send_uri_with_key`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_error: Option<OutcomeError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_error: Option<OutcomeError>,
}

impl Outcome {
    pub fn is_error_free(&self) -> bool {
        self.key_error.is_none() && self.response_error.is_none() && self.service_error().is_none()
    }

    pub fn service_error(&self) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.service_error.as_deref())
    }
}

/// A client bound to one service and one benchmark dataset.
///
/// Owns at most one *current* key at a time. The current key is replaced only
/// when a re-benchmark produces a key that is inequivalent under the current
/// key's own tolerances; the superseded key is expired, never deleted.
pub struct BenchmarkedRequestClient {
    id: ClientId,
    service: Service,
    dataset: Vec<String>,
    config: BenchmarkConfig,
    store: Store,
    request_client: RequestClient,
    log: ClientLog,
    http: reqwest::Client,
    created_at: DateTime<Utc>,
    current_key: RwLock<Option<Arc<Key>>>,
    key_history: RwLock<Vec<Arc<Key>>>,
    benchmark_serial: tokio::sync::Mutex<()>,
    benchmarking: AtomicBool,
    fail_count: parking_lot::Mutex<u32>,
    invalid_state_count: AtomicU64,
    benchmark_count: AtomicU64,
    last_benchmark: parking_lot::Mutex<Option<DateTime<Utc>>>,
    shutdown: CancellationToken,
}

impl BenchmarkedRequestClient {
    pub fn new(
        id: ClientId,
        dataset: Vec<String>,
        config: BenchmarkConfig,
        store: Store,
        provider: Arc<dyn LabelProvider>,
        shutdown: CancellationToken,
    ) -> Self {
        let log = ClientLog::new();
        let service = provider.service();
        let request_client = RequestClient::new(
            store.clone(),
            provider,
            config.max_labels,
            config.min_confidence,
            log.clone(),
        );
        Self {
            id,
            service,
            dataset,
            config,
            store,
            request_client,
            log,
            http: reqwest::Client::new(),
            created_at: Utc::now(),
            current_key: RwLock::new(None),
            key_history: RwLock::new(Vec::new()),
            benchmark_serial: tokio::sync::Mutex::new(()),
            benchmarking: AtomicBool::new(false),
            fail_count: parking_lot::Mutex::new(0),
            invalid_state_count: AtomicU64::new(0),
            benchmark_count: AtomicU64::new(0),
            last_benchmark: parking_lot::Mutex::new(None),
            shutdown,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn dataset(&self) -> &[String] {
        &self.dataset
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    pub fn log(&self) -> &ClientLog {
        &self.log
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// True between entry and exit of [`benchmark`](Self::benchmark).
    pub fn benchmarking(&self) -> bool {
        self.benchmarking.load(Ordering::SeqCst)
    }

    pub fn benchmark_count(&self) -> u64 {
        self.benchmark_count.load(Ordering::SeqCst)
    }

    pub fn invalid_state_count(&self) -> u64 {
        self.invalid_state_count.load(Ordering::SeqCst)
    }

    pub fn last_benchmark_time(&self) -> Option<DateTime<Utc>> {
        *self.last_benchmark.lock()
    }

    pub async fn current_key(&self) -> Option<Arc<Key>> {
        self.current_key.read().await.clone()
    }

    /// The most recent minted key whose `created_at` is at or before `ts`.
    /// Drives `If-Unmodified-Since` key selection.
    pub async fn key_at_or_before(&self, ts: DateTime<Utc>) -> Option<Arc<Key>> {
        self.key_history
            .read()
            .await
            .iter()
            .filter(|key| key.created_at() <= ts)
            .max_by_key(|key| key.created_at())
            .cloned()
    }

    /// Run the dataset against the provider and mint a new key.
    ///
    /// On the first run the minted key becomes current. Afterwards the
    /// current key is replaced only if the new key is inequivalent to it; an
    /// equivalent new key is kept for history but immediately expired so the
    /// client's reference point does not move.
    pub async fn benchmark(self: &Arc<Self>) -> Result<Arc<Key>> {
        let _serial = self.benchmark_serial.lock().await;
        self.benchmarking.store(true, Ordering::SeqCst);
        let result = self.run_benchmark().await;
        self.benchmarking.store(false, Ordering::SeqCst);

        match &result {
            Ok(key) => {
                self.log.info(format!("benchmark complete; current key is {}", key.id()));
                self.notify_benchmark_complete(key.id());
            }
            Err(e) => self.log.error(format!("benchmark failed: {e}")),
        }
        result
    }

    async fn run_benchmark(self: &Arc<Self>) -> Result<Arc<Key>> {
        self.log
            .info(format!("benchmarking {} against {} dataset URI(s)", self.service, self.dataset.len()));

        let batch = if self.store.supports_concurrent_writers() {
            let (batch, handle) = self.request_client.send_uris_async(&self.dataset).await?;
            handle.await.map_err(|e| DbError::Other(anyhow::anyhow!("benchmark fan-out panicked: {e}")))?;
            batch
        } else {
            self.request_client.send_uris(&self.dataset).await?
        };

        let record = self
            .store
            .insert_key(&KeyInsert {
                service: self.service,
                batch_request_id: batch.id,
                severity: self.config.severity,
                delta_labels: i64::from(self.config.delta_labels),
                delta_confidence: self.config.delta_confidence,
                max_labels: i64::from(self.config.max_labels),
                min_confidence: self.config.min_confidence,
                expected_labels: self.config.expected_labels.iter().map(|l| l.to_lowercase()).collect(),
            })
            .await?;

        let minted = Arc::new(Key::load(&self.store, record).await?);

        let mut current = self.current_key.write().await;
        let active = match current.as_ref() {
            None => {
                *current = Some(minted.clone());
                minted.clone()
            }
            Some(existing) => match existing.validate_against_key(&minted) {
                Ok(()) => {
                    self.log.info(format!(
                        "key {} is equivalent to current key {}; keeping current",
                        minted.id(),
                        existing.id()
                    ));
                    self.store.expire_key(minted.id()).await?;
                    existing.clone()
                }
                Err(reason) => {
                    self.log.warn(format!(
                        "drift detected against key {}: {reason}; rotating to key {}",
                        existing.id(),
                        minted.id()
                    ));
                    self.store.expire_key(existing.id()).await?;
                    *current = Some(minted.clone());
                    minted.clone()
                }
            },
        };
        drop(current);

        self.key_history.write().await.push(minted);
        self.benchmark_count.fetch_add(1, Ordering::SeqCst);
        *self.last_benchmark.lock() = Some(Utc::now());

        Ok(active)
    }

    /// The hot path: label `uri` only if `supplied` still matches the
    /// current key, then check the live response against the key's expected
    /// labels, and shape the outcome by the current key's severity.
    pub async fn send_uri_with_key(self: &Arc<Self>, uri: &str, supplied: &Key) -> Result<Outcome> {
        let mut outcome = Outcome::default();

        let Some(current) = self.current_key().await else {
            outcome.key_error = Some(OutcomeError::NoKeyYet);
            return Ok(outcome);
        };

        match current.validate_against_key(supplied) {
            Err(reason) => {
                outcome.key_error = Some(OutcomeError::Invalid(reason));
                self.record_validation_failure();
            }
            Ok(()) => {
                let sent = self.request_client.send_uri(uri, None, Some(current.id())).await?;

                if let Err(reason) = current.validate_against_labels(&sent.labels) {
                    outcome.response_error = Some(OutcomeError::Invalid(reason));
                    self.record_validation_failure();
                }

                outcome.labels = Some(sent.labels.clone());
                outcome.response = Some(ResponseInfo {
                    uri: uri.to_string(),
                    success: sent.response.success,
                    service_error: sent.service_error(),
                    body: sent.response.body_json().unwrap_or(serde_json::Value::Null),
                });
            }
        }

        self.maybe_trigger_rebenchmark();
        Ok(self.shape(outcome, current.severity()))
    }

    /// Count a key or response validation failure. Cumulative count feeds
    /// introspection; the resettable count feeds the re-benchmark trigger.
    fn record_validation_failure(&self) {
        self.invalid_state_count.fetch_add(1, Ordering::SeqCst);
        if self.config.trigger_on_failcount > 0 {
            *self.fail_count.lock() += 1;
        }
    }

    /// Re-benchmark once the failure count strictly exceeds the threshold.
    /// The benchmark runs detached so the request path never blocks on a
    /// dataset-sized fan-out.
    fn maybe_trigger_rebenchmark(self: &Arc<Self>) {
        if self.config.trigger_on_failcount == 0 {
            return;
        }
        let triggered = {
            let mut count = self.fail_count.lock();
            if *count > self.config.trigger_on_failcount {
                *count = 0;
                true
            } else {
                false
            }
        };
        if triggered {
            self.log.warn(format!(
                "validation failures exceeded {}; triggering re-benchmark",
                self.config.trigger_on_failcount
            ));
            let client = self.clone();
            tokio::spawn(async move {
                if let Err(e) = client.benchmark().await {
                    client.log.error(format!("failure-triggered benchmark failed: {e}"));
                }
            });
        }
    }

    fn shape(self: &Arc<Self>, mut outcome: Outcome, severity: Severity) -> Outcome {
        match severity {
            Severity::Exception => {
                outcome.labels = None;
                outcome.response = None;
            }
            Severity::Warning => {
                let has_error = outcome.key_error.is_some() || outcome.response_error.is_some();
                if !has_error {
                    return outcome;
                }
                if let Some(callback) = self.config.warning_callback_uri.clone() {
                    let payload = serde_json::json!({
                        "benchmark_client_id": self.id,
                        "result": &outcome,
                    });
                    let http = self.http.clone();
                    let log = self.log.clone();
                    tokio::spawn(async move {
                        if let Err(e) = http.post(&callback).json(&payload).send().await {
                            log.warn(format!("warning callback POST failed: {e}"));
                        }
                    });
                }
            }
            Severity::Info => {
                if let Some(err) = &outcome.key_error {
                    self.log.warn(format!("key validation failed: {err}"));
                }
                if let Some(err) = &outcome.response_error {
                    self.log.warn(format!("response validation failed: {err}"));
                }
            }
            Severity::None => {}
        }
        outcome
    }

    /// POST `{id, key_id}` to the benchmark callback, if one is configured.
    fn notify_benchmark_complete(self: &Arc<Self>, key_id: KeyId) {
        let Some(callback) = self.config.benchmark_callback_uri.clone() else {
            return;
        };
        let payload = serde_json::json!({
            "benchmark_client_id": self.id,
            "key_id": key_id,
        });
        let http = self.http.clone();
        let log = self.log.clone();
        tokio::spawn(async move {
            if let Err(e) = http.post(&callback).json(&payload).send().await {
                log.warn(format!("benchmark callback POST failed: {e}"));
            }
        });
    }
}

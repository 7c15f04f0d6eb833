//! Request and response bodies of the management surface.

use crate::benchmark::client::BenchmarkConfig;
use crate::benchmark::key::{Key, ResponseSnapshot};
use crate::db::models::{Service, Severity};
use crate::errors::Error;
use crate::types::{BatchRequestId, ClientId, KeyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of `POST /benchmark`: the target service, the benchmark dataset, and
/// the client configuration (all config fields defaulted). Parsed by hand in
/// the handler so that unknown services and severities answer 400 with a
/// precise reason instead of a generic extractor rejection.
#[derive(Debug, Clone)]
pub struct CreateBenchmark {
    pub service: Service,
    pub benchmark_dataset: Vec<String>,
    pub config: BenchmarkConfig,
}

impl CreateBenchmark {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, Error> {
        let service = value
            .get("service")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::bad_request("service is required"))?;
        let service: Service = service.parse().map_err(Error::Validation)?;

        // Probe the severity by name first so an unknown one reports
        // UnknownSeverity rather than a generic deserialization failure.
        if let Some(severity) = value.get("severity") {
            let severity = severity
                .as_str()
                .ok_or_else(|| Error::bad_request("severity must be a string"))?;
            let _: Severity = severity.parse().map_err(Error::Validation)?;
        }

        let benchmark_dataset: Vec<String> = match value.get("benchmark_dataset") {
            Some(dataset) => serde_json::from_value(dataset.clone())
                .map_err(|_| Error::bad_request("benchmark_dataset must be an array of URIs"))?,
            None => return Err(Error::bad_request("benchmark_dataset is required")),
        };

        let config: BenchmarkConfig = serde_json::from_value(value.clone())
            .map_err(|e| Error::bad_request(format!("invalid configuration: {e}")))?;

        Ok(Self {
            service,
            benchmark_dataset,
            config,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedBenchmark {
    pub id: ClientId,
}

/// Body of `GET /benchmark/:id`.
#[derive(Debug, Serialize)]
pub struct BenchmarkInfo {
    pub id: ClientId,
    pub service: Service,
    pub created_at: DateTime<Utc>,
    pub current_key_id: Option<KeyId>,
    pub is_benchmarking: bool,
    pub invalid_state_count: u64,
    pub last_benchmark_time: Option<DateTime<Utc>>,
    pub benchmark_count: u64,
    pub config: BenchmarkConfig,
    pub benchmark_dataset: Vec<String>,
}

/// Body of `GET /key/:id`: the key's configuration plus the recorded
/// responses of its batch.
#[derive(Debug, Serialize)]
pub struct KeyInfo {
    pub id: KeyId,
    pub service: Service,
    pub severity: Severity,
    pub batch_request_id: BatchRequestId,
    pub created_at: DateTime<Utc>,
    pub expired: bool,
    pub delta_labels: i64,
    pub delta_confidence: f64,
    pub max_labels: i64,
    pub min_confidence: f64,
    pub expected_labels: Vec<String>,
    pub responses: BTreeMap<String, ResponseSnapshot>,
}

impl From<&Key> for KeyInfo {
    fn from(key: &Key) -> Self {
        let record = key.record();
        Self {
            id: key.id(),
            service: key.service(),
            severity: key.severity(),
            batch_request_id: key.batch_request_id(),
            created_at: key.created_at(),
            expired: key.expired(),
            delta_labels: record.delta_labels,
            delta_confidence: record.delta_confidence,
            max_labels: record.max_labels,
            min_confidence: record.min_confidence,
            expected_labels: key.expected_labels(),
            responses: key.responses().clone(),
        }
    }
}

/// Query parameters of `GET /labels`.
#[derive(Debug, Deserialize)]
pub struct LabelsQuery {
    pub uri: String,
}

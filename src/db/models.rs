//! Row structs and the closed service/severity vocabularies.

use crate::types::{BatchRequestId, KeyId, RequestId, ResponseId};
use crate::validate::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// The vendor a request is dispatched against. Closed set, seeded at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Google,
    Amazon,
    Azure,
}

impl Service {
    pub const ALL: [Service; 3] = [Service::Google, Service::Amazon, Service::Azure];

    /// Seeded row id in the `services` table.
    pub fn id(self) -> i64 {
        match self {
            Service::Google => 1,
            Service::Amazon => 2,
            Service::Azure => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Google => "google",
            Service::Amazon => "amazon",
            Service::Azure => "azure",
        }
    }
}

impl FromStr for Service {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownService(s.to_string()))
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy applied when a key or response fails validation. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Exception,
    Warning,
    Info,
    None,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Exception, Severity::Warning, Severity::Info, Severity::None];

    /// Seeded row id in the `severities` table.
    pub fn id(self) -> i64 {
        match self {
            Severity::Exception => 1,
            Severity::Warning => 2,
            Severity::Info => 3,
            Severity::None => 4,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Exception => "exception",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::None => "none",
        }
    }
}

impl FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sev| sev.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownSeverity(s.to_string()))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of requests made together, e.g. one benchmark fan-out.
///
/// Immutable after creation except through its child requests.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BatchRequest {
    pub id: BatchRequestId,
    pub created_at: DateTime<Utc>,
}

/// One call against one URI.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RequestRecord {
    pub id: RequestId,
    pub service_id: i64,
    pub batch_request_id: Option<BatchRequestId>,
    pub uri: String,
    pub created_at: DateTime<Utc>,
}

/// Stored vendor response: raw body plus the success flag.
///
/// On success `body` holds the vendor's JSON verbatim; on failure it holds
/// the `{"service_error": "<kind> - <message>"}` envelope. A failed response
/// always decodes to an empty label map.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ResponseRecord {
    pub id: ResponseId,
    pub request_id: RequestId,
    pub benchmark_key_id: Option<KeyId>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub body: Option<Vec<u8>>,
    pub success: bool,
}

impl ResponseRecord {
    /// Decode the stored body as JSON, if present and well-formed.
    pub fn body_json(&self) -> Option<serde_json::Value> {
        self.body.as_deref().and_then(|b| serde_json::from_slice(b).ok())
    }

    /// The `service_error` message for a failed response, if any.
    pub fn service_error(&self) -> Option<String> {
        self.body_json()?
            .get("service_error")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// Persisted reference point for drift detection.
///
/// Tolerances live inside the key so a client holding an old, strict key can
/// never be silently widened by a newer, looser one.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct KeyRecord {
    pub id: KeyId,
    pub service_id: i64,
    pub batch_request_id: BatchRequestId,
    pub severity_id: i64,
    pub created_at: DateTime<Utc>,
    pub expired: bool,
    pub delta_labels: i64,
    pub delta_confidence: f64,
    pub max_labels: i64,
    pub min_confidence: f64,
    #[serde(skip)]
    pub expected_labels: String,
}

impl KeyRecord {
    pub fn service(&self) -> Service {
        Service::from_id(self.service_id).expect("key row references a seeded service")
    }

    pub fn severity(&self) -> Severity {
        Severity::from_id(self.severity_id).expect("key row references a seeded severity")
    }

    /// The ordered, lowercased expected-label set recorded at mint time.
    pub fn expected_labels(&self) -> Vec<String> {
        serde_json::from_str(&self.expected_labels).unwrap_or_default()
    }
}

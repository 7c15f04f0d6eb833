//! Benchmark keys and the two-valued validity relation.
//!
//! A [`Key`] is an immutable snapshot: the persisted key row plus the labels
//! of every response in its batch, loaded once so that validity checks are
//! pure CPU with no store access on the request path.
//!
//! Tolerances always come from the key `validate_against_*` is called on —
//! the reference the client holds — never from the challenger, so an old,
//! strict key cannot be silently widened by a newer, looser one.

use crate::db::models::{KeyRecord, Service, Severity};
use crate::db::{DbError, Store};
use crate::providers::decode_labels;
use crate::types::{BatchRequestId, KeyId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// One label whose confidence moved further than the key tolerates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceDelta {
    pub label: String,
    pub delta: f64,
}

/// The reasons a key or response fails validation, in check order.
///
/// The serialized form tags each reason with its SCREAMING_SNAKE_CASE kind,
/// which is what HTTP clients match on in 412 bodies.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvalidKeyError {
    #[error("keys reference different services: {expected} vs {actual}")]
    ServiceMismatch { expected: Service, actual: Service },

    #[error("benchmark datasets differ by {} URI(s)", difference.len())]
    DatasetMismatch { difference: Vec<String> },

    #[error("a benchmark batch contains failed responses")]
    SuccessMismatch,

    #[error("max_labels differs: {expected} vs {actual}")]
    MaxLabelsMismatch { expected: i64, actual: i64 },

    #[error("min_confidence differs: {expected} vs {actual}")]
    MinConfidenceMismatch { expected: f64, actual: f64 },

    #[error("response counts differ: {expected} vs {actual}")]
    ResponseLengthMismatch { expected: usize, actual: usize },

    #[error("labels for {uri} drifted by {} (allowed {allowed})", difference.len())]
    LabelDeltaMismatch {
        uri: String,
        allowed: i64,
        difference: Vec<String>,
    },

    #[error("confidences for {uri} drifted beyond tolerance on {} label(s)", exceeded.len())]
    ConfidenceDeltaMismatch { uri: String, exceeded: Vec<ConfidenceDelta> },

    #[error("response is missing {} expected label(s)", missing.len())]
    ExpectedLabelsMismatch { missing: Vec<String> },
}

/// The recorded outcome of one benchmark request, keyed by URI in [`Key`].
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSnapshot {
    pub success: bool,
    pub labels: BTreeMap<String, f64>,
}

/// An immutable, fully-loaded benchmark key.
#[derive(Debug, Clone)]
pub struct Key {
    record: KeyRecord,
    dataset: Vec<String>,
    responses: BTreeMap<String, ResponseSnapshot>,
}

impl Key {
    /// Load a key and the label snapshot of its batch from the store.
    pub async fn load(store: &Store, record: KeyRecord) -> Result<Key, DbError> {
        let service = record.service();
        let pairs = store.batch_pairs(record.batch_request_id).await?;

        let mut dataset = Vec::with_capacity(pairs.len());
        let mut responses = BTreeMap::new();
        for (request, response) in pairs {
            let labels = if response.success {
                response
                    .body_json()
                    .map(|body| decode_labels(service, &body))
                    .unwrap_or_default()
            } else {
                BTreeMap::new()
            };
            dataset.push(request.uri.clone());
            responses.insert(request.uri, ResponseSnapshot { success: response.success, labels });
        }

        Ok(Key {
            record,
            dataset,
            responses,
        })
    }

    /// Assemble a key from already-loaded parts. Exercised directly by the
    /// validity tests, which feed literal label maps.
    pub fn from_parts(record: KeyRecord, dataset: Vec<String>, responses: BTreeMap<String, ResponseSnapshot>) -> Key {
        Key {
            record,
            dataset,
            responses,
        }
    }

    pub fn id(&self) -> KeyId {
        self.record.id
    }

    pub fn service(&self) -> Service {
        self.record.service()
    }

    pub fn severity(&self) -> Severity {
        self.record.severity()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn expired(&self) -> bool {
        self.record.expired
    }

    pub fn batch_request_id(&self) -> BatchRequestId {
        self.record.batch_request_id
    }

    pub fn record(&self) -> &KeyRecord {
        &self.record
    }

    pub fn dataset(&self) -> &[String] {
        &self.dataset
    }

    pub fn responses(&self) -> &BTreeMap<String, ResponseSnapshot> {
        &self.responses
    }

    pub fn expected_labels(&self) -> Vec<String> {
        self.record.expected_labels()
    }

    fn fully_successful(&self) -> bool {
        !self.responses.is_empty() && self.responses.values().all(|r| r.success)
    }

    /// Decide whether `other` describes the same service behavior as this
    /// key, within this key's tolerances. The first failed check wins and
    /// names the reason.
    pub fn validate_against_key(&self, other: &Key) -> Result<(), InvalidKeyError> {
        if self.service() != other.service() {
            return Err(InvalidKeyError::ServiceMismatch {
                expected: self.service(),
                actual: other.service(),
            });
        }

        let difference = symmetric_difference(
            &self.dataset.iter().cloned().collect(),
            &other.dataset.iter().cloned().collect(),
        );
        if !difference.is_empty() {
            return Err(InvalidKeyError::DatasetMismatch { difference });
        }

        if !self.fully_successful() || !other.fully_successful() {
            return Err(InvalidKeyError::SuccessMismatch);
        }

        if self.record.max_labels != other.record.max_labels {
            return Err(InvalidKeyError::MaxLabelsMismatch {
                expected: self.record.max_labels,
                actual: other.record.max_labels,
            });
        }

        // Exact equality: min_confidence is a configuration field, not a
        // measurement, and two keys minted under different settings are not
        // comparable.
        #[allow(clippy::float_cmp)]
        if self.record.min_confidence != other.record.min_confidence {
            return Err(InvalidKeyError::MinConfidenceMismatch {
                expected: self.record.min_confidence,
                actual: other.record.min_confidence,
            });
        }

        if self.responses.len() != other.responses.len() {
            return Err(InvalidKeyError::ResponseLengthMismatch {
                expected: self.responses.len(),
                actual: other.responses.len(),
            });
        }

        // Responses are paired by URI, never by row order: batch fan-outs
        // give no cross-URI ordering guarantee.
        for uri in &self.dataset {
            let (mine, theirs) = match (self.responses.get(uri), other.responses.get(uri)) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };

            let difference = symmetric_difference(
                &mine.labels.keys().cloned().collect(),
                &theirs.labels.keys().cloned().collect(),
            );
            if difference.len() as i64 > self.record.delta_labels {
                return Err(InvalidKeyError::LabelDeltaMismatch {
                    uri: uri.clone(),
                    allowed: self.record.delta_labels,
                    difference,
                });
            }

            // Labels on only one side were already charged to the label
            // delta; the confidence check covers the shared ones.
            let mut exceeded = Vec::new();
            for (label, mine_conf) in &mine.labels {
                if let Some(their_conf) = theirs.labels.get(label) {
                    let delta = (mine_conf - their_conf).abs();
                    if delta > self.record.delta_confidence {
                        exceeded.push(ConfidenceDelta {
                            label: label.clone(),
                            delta,
                        });
                    }
                }
            }
            if !exceeded.is_empty() {
                return Err(InvalidKeyError::ConfidenceDeltaMismatch {
                    uri: uri.clone(),
                    exceeded,
                });
            }
        }

        Ok(())
    }

    /// Check a live response's labels against the key's expected labels.
    /// Extra labels in the response are allowed; missing ones are not.
    pub fn validate_against_labels(&self, labels: &BTreeMap<String, f64>) -> Result<(), InvalidKeyError> {
        let missing: Vec<String> = self
            .expected_labels()
            .into_iter()
            .filter(|expected| !labels.contains_key(expected))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(InvalidKeyError::ExpectedLabelsMismatch { missing })
        }
    }
}

/// `(A ∪ B) \ (A ∩ B)`, sorted for stable error details.
fn symmetric_difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Vec<String> {
    a.symmetric_difference(b).cloned().collect()
}

//! Vendor seam: the `LabelProvider` trait and its per-service adapters.
//!
//! An adapter downloads the image, posts it to its vendor, and normalizes
//! the result to `{lowercased label -> confidence in [0, 1]}`. Adapters never
//! return errors: every failure collapses into a `success = false` outcome
//! whose body carries a `service_error` envelope, so the request path above
//! never has to unwind.

pub mod amazon;
pub mod azure;
pub mod google;
pub mod stub;

use crate::db::models::Service;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Normalized outcome of one provider call.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Raw vendor JSON on success, `{"service_error": ...}` envelope on failure.
    pub body: Value,
    pub success: bool,
    /// Lowercased labels with confidences in [0, 1]. Empty when `success` is false.
    pub labels: BTreeMap<String, f64>,
}

impl Fetched {
    fn failure(err: &ProviderError) -> Self {
        Self {
            body: json!({ "service_error": err.to_string() }),
            success: false,
            labels: BTreeMap::new(),
        }
    }
}

/// Failure kinds inside an adapter. The rendered form (`<kind> - <message>`)
/// is what ends up in the stored `service_error` envelope.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("UnsupportedMediaType - {0}")]
    UnsupportedMediaType(String),

    #[error("DownloadFailed - {0}")]
    DownloadFailed(String),

    #[error("Timeout - timeout")]
    Timeout,

    #[error("ServiceError - {0}")]
    ServiceError(String),

    #[error("MissingCredential - {0} is not set")]
    MissingCredential(&'static str),
}

/// The only seam to vendor code.
#[async_trait]
pub trait LabelProvider: Send + Sync {
    fn service(&self) -> Service;

    /// Label the image at `uri`. Infallible: failures become
    /// `success = false` outcomes.
    async fn fetch(&self, uri: &str, max_labels: u32, min_confidence: f64) -> Fetched;
}

/// Build the adapter for a service.
///
/// Credentials come from the environment: `AZURE_SUBSCRIPTION_KEY` is
/// required to use Azure; `GOOGLE_CLOUD_API_KEY` is attached to Google calls
/// when present. An unauthenticated call simply folds into a service error
/// like any other vendor rejection.
pub fn create_provider(service: Service, timeout: Duration) -> Result<Arc<dyn LabelProvider>, ProviderError> {
    let client = Client::new();
    match service {
        Service::Google => Ok(Arc::new(google::GoogleProvider::new(
            client,
            std::env::var("GOOGLE_CLOUD_API_KEY").ok(),
            timeout,
        ))),
        Service::Amazon => Ok(Arc::new(amazon::AmazonProvider::new(client, timeout))),
        Service::Azure => {
            let key = std::env::var("AZURE_SUBSCRIPTION_KEY")
                .map_err(|_| ProviderError::MissingCredential("AZURE_SUBSCRIPTION_KEY"))?;
            Ok(Arc::new(azure::AzureProvider::new(client, key, timeout)))
        }
    }
}

/// Download an image, rejecting non-image MIME types.
pub(crate) async fn download_image(client: &Client, uri: &str, timeout: Duration) -> Result<Vec<u8>, ProviderError> {
    let response = client.get(uri).timeout(timeout).send().await.map_err(classify_transport)?;

    if !response.status().is_success() {
        return Err(ProviderError::DownloadFailed(format!("HTTP {}", response.status().as_u16())));
    }

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if !mime.starts_with("image/") {
        return Err(ProviderError::UnsupportedMediaType(mime));
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(classify_transport)
}

pub(crate) fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout
    } else if err.is_connect() || err.is_request() {
        ProviderError::DownloadFailed(err.to_string())
    } else {
        ProviderError::ServiceError(err.to_string())
    }
}

/// Lowercase a label, clamp its confidence, and fold it into the map.
fn insert_normalized(labels: &mut BTreeMap<String, f64>, name: &str, confidence: f64) {
    labels.insert(name.to_lowercase(), confidence.clamp(0.0, 1.0));
}

/// Decode the labels of a stored raw vendor body.
///
/// Each vendor nests its annotations differently; confidences on the Amazon
/// side arrive on a 0-100 scale and are divided down. A body that does not
/// carry the vendor's expected field decodes to the empty map, matching the
/// invariant that failed responses have no labels.
pub fn decode_labels(service: Service, body: &Value) -> BTreeMap<String, f64> {
    let mut labels = BTreeMap::new();
    match service {
        Service::Google => {
            let annotations = body
                .get("responses")
                .and_then(|r| r.get(0))
                .and_then(|r| r.get("labelAnnotations"))
                .and_then(|a| a.as_array());
            for entry in annotations.into_iter().flatten() {
                if let (Some(name), Some(score)) = (
                    entry.get("description").and_then(|v| v.as_str()),
                    entry.get("score").and_then(|v| v.as_f64()),
                ) {
                    insert_normalized(&mut labels, name, score);
                }
            }
        }
        Service::Amazon => {
            let entries = body
                .get("labels")
                .or_else(|| body.get("Labels"))
                .and_then(|l| l.as_array());
            for entry in entries.into_iter().flatten() {
                let name = entry.get("name").or_else(|| entry.get("Name")).and_then(|v| v.as_str());
                let confidence = entry
                    .get("confidence")
                    .or_else(|| entry.get("Confidence"))
                    .and_then(|v| v.as_f64());
                if let (Some(name), Some(confidence)) = (name, confidence) {
                    let scaled = if confidence > 1.0 { confidence / 100.0 } else { confidence };
                    insert_normalized(&mut labels, name, scaled);
                }
            }
        }
        Service::Azure => {
            let entries = body.get("tags").and_then(|t| t.as_array());
            for entry in entries.into_iter().flatten() {
                if let (Some(name), Some(confidence)) = (
                    entry.get("name").and_then(|v| v.as_str()),
                    entry.get("confidence").and_then(|v| v.as_f64()),
                ) {
                    insert_normalized(&mut labels, name, confidence);
                }
            }
        }
    }
    labels
}

/// Synthesize a vendor-shaped body for a label map. Used by the stub
/// provider so the stored bodies it produces decode like real vendor bodies.
pub fn encode_body(service: Service, labels: &BTreeMap<String, f64>) -> Value {
    match service {
        Service::Google => {
            let annotations: Vec<Value> = labels
                .iter()
                .map(|(name, score)| json!({ "description": name, "score": score }))
                .collect();
            json!({ "responses": [{ "labelAnnotations": annotations }] })
        }
        Service::Amazon => {
            let entries: Vec<Value> = labels
                .iter()
                .map(|(name, confidence)| json!({ "name": name, "confidence": confidence * 100.0 }))
                .collect();
            json!({ "labels": entries })
        }
        Service::Azure => {
            let entries: Vec<Value> = labels
                .iter()
                .map(|(name, confidence)| json!({ "name": name, "confidence": confidence }))
                .collect();
            json!({ "tags": entries })
        }
    }
}

/// Keep the `limit` highest-confidence labels.
pub(crate) fn truncate_labels(labels: BTreeMap<String, f64>, limit: u32) -> BTreeMap<String, f64> {
    if labels.len() <= limit as usize {
        return labels;
    }
    let mut ranked: Vec<(String, f64)> = labels.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit as usize);
    ranked.into_iter().collect()
}

//! Amazon-style label detection adapter.

use super::{classify_transport, decode_labels, download_image, truncate_labels, Fetched, LabelProvider, ProviderError};
use crate::db::models::Service;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://rekognition.us-east-1.amazonaws.com/";

pub struct AmazonProvider {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl AmazonProvider {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn try_fetch(&self, uri: &str, max_labels: u32, min_confidence: f64) -> Result<Fetched, ProviderError> {
        let image = download_image(&self.client, uri, self.timeout).await?;
        let bytes = base64::engine::general_purpose::STANDARD.encode(image);

        // Rekognition filters on its 0-100 confidence scale server-side; the
        // client-side filter below re-applies it on the normalized scale.
        let payload = json!({
            "Image": { "Bytes": bytes },
            "MaxLabels": max_labels,
            "MinConfidence": min_confidence * 100.0
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header("X-Amz-Target", "RekognitionService.DetectLabels")
            .header(reqwest::header::CONTENT_TYPE, "application/x-amz-json-1.1")
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ServiceError(format!("HTTP {}", status.as_u16())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ServiceError(format!("unparseable body: {e}")))?;

        if body.get("labels").is_none() && body.get("Labels").is_none() {
            return Err(ProviderError::ServiceError("missing 'labels' field".to_string()));
        }

        let labels: std::collections::BTreeMap<String, f64> = decode_labels(Service::Amazon, &body)
            .into_iter()
            .filter(|(_, confidence)| *confidence >= min_confidence)
            .collect();

        Ok(Fetched {
            body,
            success: true,
            labels: truncate_labels(labels, max_labels),
        })
    }
}

#[async_trait]
impl LabelProvider for AmazonProvider {
    fn service(&self) -> Service {
        Service::Amazon
    }

    async fn fetch(&self, uri: &str, max_labels: u32, min_confidence: f64) -> Fetched {
        match self.try_fetch(uri, max_labels, min_confidence).await {
            Ok(fetched) => fetched,
            Err(err) => Fetched::failure(&err),
        }
    }
}

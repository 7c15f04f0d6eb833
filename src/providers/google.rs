//! Google-style label detection adapter.

use super::{classify_transport, decode_labels, download_image, truncate_labels, Fetched, LabelProvider, ProviderError};
use crate::db::models::Service;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

pub struct GoogleProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl GoogleProvider {
    pub fn new(client: Client, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key,
            timeout,
        }
    }

    /// Point the adapter at a different annotate endpoint. Used by tests to
    /// swap in a stubbed vendor.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn try_fetch(&self, uri: &str, max_labels: u32, min_confidence: f64) -> Result<Fetched, ProviderError> {
        let image = download_image(&self.client, uri, self.timeout).await?;
        let content = base64::engine::general_purpose::STANDARD.encode(image);

        let payload = json!({
            "requests": [{
                "image": { "content": content },
                "features": [{ "type": "LABEL_DETECTION", "maxResults": max_labels }]
            }]
        });

        let mut request = self.client.post(&self.endpoint).timeout(self.timeout).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::ServiceError(format!("HTTP {}", status.as_u16())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::ServiceError(format!("unparseable body: {e}")))?;

        if body.get("responses").is_none() {
            return Err(ProviderError::ServiceError("missing 'responses' field".to_string()));
        }

        let labels: std::collections::BTreeMap<String, f64> = decode_labels(Service::Google, &body)
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
impl LabelProvider for GoogleProvider {
    fn service(&self) -> Service {
        Service::Google
    }

    async fn fetch(&self, uri: &str, max_labels: u32, min_confidence: f64) -> Fetched {
        match self.try_fetch(uri, max_labels, min_confidence).await {
            Ok(fetched) => fetched,
            Err(err) => Fetched::failure(&err),
        }
    }
}

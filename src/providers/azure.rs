//! Azure-style tag detection adapter.

use super::{classify_transport, decode_labels, download_image, truncate_labels, Fetched, LabelProvider, ProviderError};
use crate::db::models::Service;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://westcentralus.api.cognitive.microsoft.com/vision/v2.0/tag";

pub struct AzureProvider {
    client: Client,
    endpoint: String,
    subscription_key: String,
    timeout: Duration,
}

impl AzureProvider {
    pub fn new(client: Client, subscription_key: String, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            subscription_key,
            timeout,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn try_fetch(&self, uri: &str, max_labels: u32) -> Result<Fetched, ProviderError> {
        let image = download_image(&self.client, uri, self.timeout).await?;

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image)
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

        if body.get("tags").is_none() {
            return Err(ProviderError::ServiceError("missing 'tags' field".to_string()));
        }

        let labels = decode_labels(Service::Azure, &body);

        Ok(Fetched {
            body,
            success: true,
            labels: truncate_labels(labels, max_labels),
        })
    }
}

#[async_trait]
impl LabelProvider for AzureProvider {
    fn service(&self) -> Service {
        Service::Azure
    }

    /// The tag endpoint has no confidence parameter; `min_confidence` is
    /// accepted for interface uniformity and ignored.
    async fn fetch(&self, uri: &str, max_labels: u32, _min_confidence: f64) -> Fetched {
        match self.try_fetch(uri, max_labels).await {
            Ok(fetched) => fetched,
            Err(err) => Fetched::failure(&err),
        }
    }
}

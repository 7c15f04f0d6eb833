//! Dispatch of single and batched labeling requests through one provider.
//!
//! Every dispatch persists a `Request` row before the provider call and a
//! `Response` row after it, so the store is a complete record of everything
//! that was ever asked of a vendor. Provider failures of any kind land as
//! `success = false` rows plus a WARN line in the owning client's log; the
//! only errors that propagate from here are store failures.

use crate::db::models::{BatchRequest, RequestRecord, ResponseRecord, Service};
use crate::db::{DbError, Result, Store};
use crate::logging::ClientLog;
use crate::providers::LabelProvider;
use crate::types::{BatchRequestId, KeyId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};

/// A persisted request/response pair with the decoded labels of the call.
#[derive(Debug, Clone)]
pub struct LabeledResponse {
    pub request: RequestRecord,
    pub response: ResponseRecord,
    pub labels: BTreeMap<String, f64>,
}

impl LabeledResponse {
    /// The stored `service_error`, if the call failed.
    pub fn service_error(&self) -> Option<String> {
        self.response.service_error()
    }
}

#[derive(Clone)]
pub struct RequestClient {
    store: Store,
    provider: Arc<dyn LabelProvider>,
    max_labels: u32,
    min_confidence: f64,
    log: ClientLog,
}

impl RequestClient {
    pub fn new(store: Store, provider: Arc<dyn LabelProvider>, max_labels: u32, min_confidence: f64, log: ClientLog) -> Self {
        Self {
            store,
            provider,
            max_labels,
            min_confidence,
            log,
        }
    }

    pub fn service(&self) -> Service {
        self.provider.service()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Dispatch one URI. The request row is timestamped before the provider
    /// call, the response row after it.
    pub async fn send_uri(
        &self,
        uri: &str,
        batch: Option<BatchRequestId>,
        benchmark_key: Option<KeyId>,
    ) -> Result<LabeledResponse> {
        let request = self.store.create_request(self.provider.service(), batch, uri).await?;

        let fetched = self.provider.fetch(uri, self.max_labels, self.min_confidence).await;
        if !fetched.success {
            let reason = fetched
                .body
                .get("service_error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            self.log.warn(format!("request {} for {uri} failed: {reason}", request.id));
        }

        let body = serde_json::to_vec(&fetched.body).map_err(anyhow::Error::from)?;
        let response = self
            .store
            .create_response(request.id, benchmark_key, Some(body.as_slice()), fetched.success)
            .await?;

        Ok(LabeledResponse {
            request,
            response,
            labels: fetched.labels,
        })
    }

    /// Dispatch every URI serially under one fresh batch.
    pub async fn send_uris(&self, uris: &[String]) -> Result<BatchRequest> {
        let batch = self.store.create_batch_request().await?;
        for uri in uris {
            self.send_uri(uri, Some(batch.id), None).await?;
        }
        Ok(batch)
    }

    /// Dispatch every URI on its own task under one fresh batch.
    ///
    /// The returned handle completes once every request and response row of
    /// the batch has been persisted. Requires a store that tolerates
    /// concurrent writers; otherwise the call is rejected with
    /// [`DbError::UnsupportedBackend`] and the caller should take the serial
    /// path.
    pub async fn send_uris_async(&self, uris: &[String]) -> Result<(BatchRequest, JoinHandle<()>)> {
        if !self.store.supports_concurrent_writers() {
            return Err(DbError::UnsupportedBackend);
        }

        let batch = self.store.create_batch_request().await?;
        let batch_id = batch.id;

        let mut tasks = JoinSet::new();
        for uri in uris.iter().cloned() {
            let client = self.clone();
            tasks.spawn(async move {
                if let Err(e) = client.send_uri(&uri, Some(batch_id), None).await {
                    client.log.error(format!("failed to persist batch row for {uri}: {e}"));
                }
            });
        }

        let log = self.log.clone();
        let handle = tokio::spawn(async move {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    log.error(format!("batch worker panicked: {e}"));
                }
            }
        });

        Ok((batch, handle))
    }
}

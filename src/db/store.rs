//! Typed accessors over the SQLite pool.

use crate::db::models::{BatchRequest, KeyRecord, RequestRecord, ResponseRecord, Service, Severity};
use crate::db::Result;
use crate::types::{BatchRequestId, KeyId, RequestId};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::instrument;

/// Handle on the store. Cheap to clone; all clones share the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    concurrent_writers: bool,
}

/// Configuration recorded on a key row at mint time.
#[derive(Debug, Clone)]
pub struct KeyInsert {
    pub service: Service,
    pub batch_request_id: BatchRequestId,
    pub severity: Severity,
    pub delta_labels: i64,
    pub delta_confidence: f64,
    pub max_labels: i64,
    pub min_confidence: f64,
    pub expected_labels: Vec<String>,
}

impl Store {
    pub fn new(pool: SqlitePool, concurrent_writers: bool) -> Self {
        Self { pool, concurrent_writers }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether the backing store tolerates several writer tasks at once.
    /// Gates the parallel batch path.
    pub fn supports_concurrent_writers(&self) -> bool {
        self.concurrent_writers
    }

    #[instrument(skip(self), err)]
    pub async fn create_batch_request(&self) -> Result<BatchRequest> {
        let batch = sqlx::query_as::<_, BatchRequest>(
            "INSERT INTO batch_requests (created_at) VALUES (?) RETURNING id, created_at",
        )
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(batch)
    }

    pub async fn batch_request(&self, id: BatchRequestId) -> Result<Option<BatchRequest>> {
        let batch = sqlx::query_as::<_, BatchRequest>("SELECT id, created_at FROM batch_requests WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(batch)
    }

    /// Persist a request row, timestamped at the moment of insertion, which
    /// the caller arranges to be before provider dispatch.
    #[instrument(skip(self), fields(service = %service), err)]
    pub async fn create_request(
        &self,
        service: Service,
        batch_request_id: Option<BatchRequestId>,
        uri: &str,
    ) -> Result<RequestRecord> {
        let request = sqlx::query_as::<_, RequestRecord>(
            "INSERT INTO requests (service_id, batch_request_id, uri, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING id, service_id, batch_request_id, uri, created_at",
        )
        .bind(service.id())
        .bind(batch_request_id)
        .bind(uri)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(request)
    }

    #[instrument(skip(self, body), err)]
    pub async fn create_response(
        &self,
        request_id: RequestId,
        benchmark_key_id: Option<KeyId>,
        body: Option<&[u8]>,
        success: bool,
    ) -> Result<ResponseRecord> {
        let response = sqlx::query_as::<_, ResponseRecord>(
            "INSERT INTO responses (request_id, benchmark_key_id, created_at, body, success)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, request_id, benchmark_key_id, created_at, body, success",
        )
        .bind(request_id)
        .bind(benchmark_key_id)
        .bind(Utc::now())
        .bind(body)
        .bind(success)
        .fetch_one(&self.pool)
        .await?;
        Ok(response)
    }

    pub async fn response_for_request(&self, request_id: RequestId) -> Result<Option<ResponseRecord>> {
        let response = sqlx::query_as::<_, ResponseRecord>(
            "SELECT id, request_id, benchmark_key_id, created_at, body, success
             FROM responses WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(response)
    }

    /// All requests of a batch paired with their responses, joined by
    /// request id. Requests that have not yet received a response are
    /// omitted, so callers comparing batches see only completed pairs.
    pub async fn batch_pairs(&self, batch_request_id: BatchRequestId) -> Result<Vec<(RequestRecord, ResponseRecord)>> {
        let requests = sqlx::query_as::<_, RequestRecord>(
            "SELECT id, service_id, batch_request_id, uri, created_at
             FROM requests WHERE batch_request_id = ? ORDER BY id",
        )
        .bind(batch_request_id)
        .fetch_all(&self.pool)
        .await?;

        let responses = sqlx::query_as::<_, ResponseRecord>(
            "SELECT id, request_id, benchmark_key_id, created_at, body, success
             FROM responses
             WHERE request_id IN (SELECT id FROM requests WHERE batch_request_id = ?)",
        )
        .bind(batch_request_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_request: std::collections::HashMap<RequestId, ResponseRecord> =
            responses.into_iter().map(|r| (r.request_id, r)).collect();

        Ok(requests
            .into_iter()
            .filter_map(|req| by_request.remove(&req.id).map(|resp| (req, resp)))
            .collect())
    }

    #[instrument(skip(self, insert), fields(service = %insert.service, batch = %insert.batch_request_id), err)]
    pub async fn insert_key(&self, insert: &KeyInsert) -> Result<KeyRecord> {
        let expected = serde_json::to_string(&insert.expected_labels).map_err(anyhow::Error::from)?;
        let key = sqlx::query_as::<_, KeyRecord>(
            "INSERT INTO benchmark_keys
                 (service_id, batch_request_id, severity_id, created_at, expired,
                  delta_labels, delta_confidence, max_labels, min_confidence, expected_labels)
             VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
             RETURNING id, service_id, batch_request_id, severity_id, created_at, expired,
                       delta_labels, delta_confidence, max_labels, min_confidence, expected_labels",
        )
        .bind(insert.service.id())
        .bind(insert.batch_request_id)
        .bind(insert.severity.id())
        .bind(Utc::now())
        .bind(insert.delta_labels)
        .bind(insert.delta_confidence)
        .bind(insert.max_labels)
        .bind(insert.min_confidence)
        .bind(expected)
        .fetch_one(&self.pool)
        .await?;
        Ok(key)
    }

    pub async fn key(&self, id: KeyId) -> Result<Option<KeyRecord>> {
        let key = sqlx::query_as::<_, KeyRecord>(
            "SELECT id, service_id, batch_request_id, severity_id, created_at, expired,
                    delta_labels, delta_confidence, max_labels, min_confidence, expected_labels
             FROM benchmark_keys WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(key)
    }

    /// Mark a key expired. Expiry is one-way; keys are never deleted.
    #[instrument(skip(self), err)]
    pub async fn expire_key(&self, id: KeyId) -> Result<()> {
        sqlx::query("UPDATE benchmark_keys SET expired = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

//! Per-client re-benchmark scheduler.
//!
//! Each benchmark client gets one background task that sleeps until the next
//! fire time of its cron schedule, runs a benchmark, and repeats. Tick
//! failures are logged and retried on the next tick; the task exits when the
//! client's cancellation token fires (client removal or process shutdown).

use crate::benchmark::client::BenchmarkedRequestClient;
use crate::validate;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn the scheduler task for a client.
pub fn spawn(client: Arc<BenchmarkedRequestClient>) -> JoinHandle<()> {
    let token = client.shutdown_token().clone();
    tokio::spawn(async move {
        let line = &client.config().trigger_on_schedule;
        let schedule = match validate::cron_schedule(line) {
            Ok(schedule) => schedule,
            Err(e) => {
                // Config validation happens before a client reaches the
                // registry, so this only fires on programmer error.
                client.log().error(format!("invalid benchmark schedule '{line}': {e}"));
                return;
            }
        };

        loop {
            let now = Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                client.log().warn("benchmark schedule has no future fire times; scheduler stopping");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = client.benchmark().await {
                        client.log().warn(format!("scheduled benchmark failed: {e}; retrying on next tick"));
                    }
                }
                _ = token.cancelled() => {
                    tracing::debug!(client = %client.id(), "scheduler stopping on shutdown signal");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::client::BenchmarkConfig;
    use crate::db::models::Service;
    use crate::providers::stub::StubProvider;
    use crate::types::ClientId;
    use sqlx::SqlitePool;
    use tokio_util::sync::CancellationToken;

    #[sqlx::test(migrations = "./migrations")]
    async fn scheduler_stops_on_cancellation(pool: SqlitePool) {
        let stub = StubProvider::new(Service::Google).push(&[("cat", 0.9)]);
        let token = CancellationToken::new();
        let client = Arc::new(BenchmarkedRequestClient::new(
            ClientId(1),
            vec!["https://example.com/u1.jpg".to_string()],
            BenchmarkConfig::default(),
            crate::db::from_pool(pool, true),
            Arc::new(stub),
            token.clone(),
        ));

        let handle = spawn(client);
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop after cancellation")
            .unwrap();
    }
}

//! # icvsb: Benchmarked Request Client for Computer Vision Services
//!
//! `icvsb` shields applications from silent behavioral drift in third-party
//! computer-vision labeling APIs. A client registers a *benchmark client*
//! against one vendor (a Google-style label detector, an Amazon-style label
//! detector, or an Azure-style tag detector) and a fixed reference image set.
//! The benchmark client runs the reference set against the vendor and mints a
//! **benchmark key**: a persisted snapshot of the labels the vendor produced,
//! together with tolerance thresholds. The key is the unit of cache validity
//! — an opaque behavior token the application holds on to.
//!
//! From then on the application labels images *conditionally*: "label this
//! image, but only if the service still behaves like the reference point I
//! hold". Over HTTP this maps onto standard conditional-request semantics:
//! the held key travels in `If-Match` as a weak ETag, and a drifted service
//! answers `412 Precondition Failed` instead of quietly returning labels
//! that no longer mean what they used to.
//!
//! ## Architecture
//!
//! The HTTP layer is built on [Axum](https://github.com/tokio-rs/axum); all
//! persistence goes through SQLite via `sqlx` (five entity tables, no ORM).
//!
//! - [`providers`] — the `LabelProvider` seam: one adapter per vendor that
//!   downloads the image, calls the vendor, and normalizes labels to
//!   `{lowercased label -> confidence in [0, 1]}`. Adapters never return
//!   errors; failures become `success = false` response rows.
//! - [`client`] — `RequestClient`: single, serial-batch, and parallel-batch
//!   dispatch through one provider, persisting every request and response.
//! - [`benchmark`] — the key engine (the eight-reason validity relation) and
//!   the `BenchmarkedRequestClient` orchestrating initial benchmarks,
//!   cron-scheduled re-benchmarks, failure-triggered re-benchmarks, and
//!   severity-shaped outcomes.
//! - [`registry`] — the process-wide `id -> client` map; holds the only
//!   strong reference to each client and cancels its scheduler on removal.
//! - [`api`] — the REST facade, including the conditional `/labels`
//!   endpoint with its ETag / `If-Match` / `If-Unmodified-Since` handling.
//!
//! Each benchmark client additionally owns an append-only log mirror: lines
//! logged on its request and benchmark paths go to the global `tracing`
//! subscriber *and* to the client's own buffer, readable in isolation via
//! `GET /benchmark/:id/log`.

pub mod api;
pub mod benchmark;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod logging;
pub mod providers;
pub mod registry;
pub mod telemetry;
pub mod types;
pub mod validate;

use crate::api::conditional::ResponseCache;
use crate::api::handlers;
use crate::db::models::Service;
use crate::db::Store;
use crate::providers::{LabelProvider, ProviderError};
use crate::registry::Registry;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

pub use config::Config;

/// Builds the adapter for a service. Swappable so tests can hand the
/// registry deterministic stub providers.
pub type ProviderFactory = Arc<dyn Fn(Service) -> Result<Arc<dyn LabelProvider>, ProviderError> + Send + Sync>;

/// Shared state behind every request handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub registry: Arc<Registry>,
    pub labels_cache: Arc<ResponseCache>,
    pub provider_factory: ProviderFactory,
}

impl AppState {
    /// Assemble state around a connected store. `shutdown` is the root
    /// cancellation token; every benchmark client's scheduler hangs off a
    /// child of it.
    pub fn new(store: Store, config: Config, shutdown: CancellationToken) -> Self {
        let timeout = config.provider_timeout;
        Self {
            store,
            config,
            registry: Arc::new(Registry::new(shutdown)),
            labels_cache: Arc::new(ResponseCache::default()),
            provider_factory: Arc::new(move |service| providers::create_provider(service, timeout)),
        }
    }

    /// Replace the provider factory, e.g. with one returning stubs.
    pub fn with_provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.provider_factory = factory;
        self
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/healthz", get(handlers::healthz))
        .route("/benchmark", post(handlers::create_benchmark))
        .route("/benchmark/{id}", get(handlers::get_benchmark))
        .route("/benchmark/{id}/key", get(handlers::get_benchmark_key))
        .route("/benchmark/{id}/log", get(handlers::get_benchmark_log))
        .route("/key/{id}", get(handlers::get_key))
        .route("/labels", get(handlers::get_labels))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Connect the store, build the router, and serve until ctrl-c.
///
/// Shutdown cancels the root token, which stops every benchmark client's
/// scheduler task; in-flight HTTP requests are drained by axum's graceful
/// shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = db::connect(&config.database_connection_url).await?;
    info!(url = %config.database_connection_url, "store connected and migrated");

    let shutdown = CancellationToken::new();
    let state = AppState::new(store, config.clone(), shutdown.clone());
    let registry = state.registry.clone();
    let router = build_router(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, stopping schedulers");
            registry.shutdown();
        })
        .await?;

    Ok(())
}

//! Tracing initialization.
//!
//! Sets up `tracing-subscriber` with an `EnvFilter` (default `info`) and a
//! fmt layer writing either to standard output or to the file named by
//! `ICVSB_LOGGER_FILE`. A second, target-filtered layer mirrors the store's
//! statement log (`sqlx` events) into `ICVSB_DATABASE_LOG_FILE`.
//!
//! Per-client logs are handled separately: the request and benchmark paths
//! carry a [`crate::logging::ClientLog`] handle and mirror their own lines
//! into it, so a client's log can be read in isolation over HTTP.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global subscriber.
///
/// `logger_file` is the global sink (stdout when `None`); `database_log_file`
/// receives only `sqlx`-targeted events so statement logging does not drown
/// the application log.
pub fn init(logger_file: Option<&Path>, database_log_file: &Path) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let db_log = OpenOptions::new().create(true).append(true).open(database_log_file)?;
    let db_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Arc::new(db_log))
        .with_filter(Targets::new().with_target("sqlx", tracing::Level::DEBUG));

    // The EnvFilter scopes the main sink only; attaching it globally would
    // also starve the statement-log layer of sqlx debug events.
    let fmt_layer = match logger_file {
        Some(path) => {
            let sink = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(sink))
                .boxed()
        }
        None => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .with(db_layer)
        .try_init()?;

    Ok(())
}

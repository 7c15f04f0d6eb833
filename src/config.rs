//! Process configuration.
//!
//! The whole configuration surface is environment-driven (`ICVSB_*`), so the
//! clap `Args` struct doubles as the loader: every option can be given on the
//! command line or through its environment variable.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Benchmarked request client for computer vision services", long_about = None)]
pub struct Args {
    /// Store connection URL
    #[arg(long, env = "ICVSB_DATABASE_CONNECTION_URL", default_value = "sqlite://icvsb.db")]
    pub database_connection_url: String,

    /// File that receives the store's statement log
    #[arg(long, env = "ICVSB_DATABASE_LOG_FILE", default_value = "icvsb.db.log")]
    pub database_log_file: PathBuf,

    /// Global log sink; standard output when unset
    #[arg(long, env = "ICVSB_LOGGER_FILE")]
    pub logger_file: Option<PathBuf>,

    /// Address to bind the HTTP server on
    #[arg(long, env = "ICVSB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP server on
    #[arg(long, env = "ICVSB_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Per-call deadline for provider requests, in seconds
    #[arg(long, env = "ICVSB_PROVIDER_TIMEOUT_SECS", default_value_t = 30)]
    pub provider_timeout_secs: u64,
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_connection_url: String,
    pub database_log_file: PathBuf,
    pub logger_file: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub provider_timeout: Duration,
}

impl Config {
    pub fn load(args: &Args) -> Self {
        Self {
            database_connection_url: args.database_connection_url.clone(),
            database_log_file: args.database_log_file.clone(),
            logger_file: args.logger_file.clone(),
            host: args.host.clone(),
            port: args.port,
            provider_timeout: Duration::from_secs(args.provider_timeout_secs),
        }
    }

    /// Config for in-process test servers: loopback bind, short provider
    /// deadline, throwaway log files.
    pub fn for_tests() -> Self {
        Self {
            database_connection_url: "sqlite::memory:".to_string(),
            database_log_file: std::env::temp_dir().join("icvsb-test.db.log"),
            logger_file: None,
            host: "127.0.0.1".to_string(),
            port: 0,
            provider_timeout: Duration::from_secs(5),
        }
    }
}

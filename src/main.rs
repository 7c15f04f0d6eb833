use clap::Parser;
use icvsb::config::{Args, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args);

    icvsb::telemetry::init(config.logger_file.as_deref(), &config.database_log_file)?;
    tracing::debug!("{:?}", args);

    icvsb::run(config).await
}

use anyhow::Result;
use clap::Parser;
use microblog::{api, config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let cfg = config::Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if cfg.ephemeral_secret {
        tracing::warn!("no jwt secret configured; tokens will not survive a restart");
    }
    tracing::info!(data_dir = %cfg.data_dir.display(), "starting microblog");
    api::run_http_server(cfg).await
}

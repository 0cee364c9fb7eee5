use anyhow::{Context, Result};
use clap::Parser;
use podsync::cli::Cli;
use podsync::session;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("podsync={}", cli.log_level())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false)
        .init();

    let config = cli.resolve_config().context("Invalid configuration")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let report = session::run(config, shutdown)
        .await
        .context("Sync session failed")?;

    if let Some(bulk) = &report.bulk {
        println!(
            "Initial sync: {} files, {} directories, {} bytes compressed",
            bulk.summary.files, bulk.summary.dirs, bulk.archive_bytes
        );
    }
    let stats = &report.stats;
    println!(
        "Synced {} files ({} bytes), deleted {}, failed {}, skipped {}",
        stats.upserts, stats.bytes, stats.deletes, stats.failed, stats.skipped
    );

    Ok(())
}

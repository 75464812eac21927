// Evaluation service binary
//
// Startup order: CLI subcommands, config (env > file > defaults, then flags),
// logging, state (replaying the journal if configured), then serve until
// Ctrl-C. In-flight requests finish before the process exits.

use anyhow::Result;
use clap::Parser;
use evaluation::cli::{handle_cli, Cli};
use evaluation::config::Config;
use evaluation::logging::{self, Console};
use evaluation::service::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle CLI subcommands (config --show, etc.) before starting the service
    if handle_cli(&cli) {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let mut config = Config::from_env()?;
    cli.apply(&mut config)?;

    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _log_guard = logging::init(&config.logging, Console::Stdout);

    let state = AppState::from_config(&config)?;
    let summary = state.store.summary()?;
    tracing::info!(
        "Store ready: {} queries, {} search reports, {} feedback, {} metrics reports",
        summary.queries,
        summary.search_reports,
        summary.feedback,
        summary.metrics
    );
    if state.store.journal_path().is_none() {
        tracing::info!("No data_dir configured, reports are kept in memory only");
    }

    service::start_service(&config, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down...");
    })
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

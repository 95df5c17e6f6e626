//! Mail queue worker - background processor for the persisted email queue.
//!
//! Wakes every `CHECK_INTERVAL_SECS`, claims due entries per email type and
//! sends them through SMTP (or logs them in dry-run mode). Stops after the
//! in-flight cycle on SIGINT/SIGTERM.

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use mailqueue::telemetry::{init_logging, shutdown_signal};
use mailqueue::{
    open_repository, Config, DryRunSender, MailSender, ProcessorConfig, QueueProcessor,
    SmtpMailSender,
};

/// Background worker that delivers queued emails.
#[derive(Parser)]
#[command(name = "mailqueue-worker")]
#[command(version)]
struct Args {
    /// Run a single processing cycle and exit.
    #[arg(long)]
    once: bool,

    /// Log messages instead of sending them (same as DRY_RUN=true).
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging();

    info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_lookup(|name| {
        if name == "DRY_RUN" && args.dry_run {
            Some("true".to_string())
        } else {
            env::var(name).ok()
        }
    })
    .map_err(|e| {
        error!(error = %e, "config_invalid");
        e
    })
    .context("Invalid configuration")?;

    info!(
        database_url = %config.database_url,
        check_interval_secs = config.check_interval.as_secs(),
        batch_size = config.batch_size,
        max_retries = config.max_retries,
        send_timeout_secs = config.send_timeout.as_secs(),
        dry_run = config.dry_run,
        campaigns_scheduled = config.campaign_calendar.iter().count(),
        "config_loaded"
    );

    let repo = open_repository(&config)
        .await
        .context("Failed to open queue database")?;

    let sender: Arc<dyn MailSender> = if config.dry_run {
        Arc::new(DryRunSender)
    } else {
        Arc::new(
            SmtpMailSender::new(&config.smtp, config.send_timeout)
                .context("Failed to configure SMTP sender")?,
        )
    };

    let processor = QueueProcessor::new(repo, sender, ProcessorConfig::from(&config));

    if args.once {
        let report = processor
            .run_cycle(Utc::now())
            .await
            .context("Processing cycle failed")?;
        info!(
            claimed = report.claimed(),
            sent = report.sent(),
            failed = report.failed(),
            "worker_single_cycle_complete"
        );
        return Ok(());
    }

    let handle = processor.spawn();
    info!("worker_ready");

    shutdown_signal().await;
    info!("worker_stopping");

    handle.stop().await;
    info!("worker_shutdown_complete");

    Ok(())
}

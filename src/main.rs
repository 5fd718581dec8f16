//! EventHub - media cache and background job service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use eventhub::{cache::format_bytes, config::Args, logging, server, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init_tracing(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  EventHub - media cache & jobs");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!(
        "Cache budget: {} (item ceiling {}, max {} items)",
        format_bytes(args.cache.cache_max_mb * 1024 * 1024),
        format_bytes(args.cache.cache_max_item_mb * 1024 * 1024),
        args.cache.cache_max_items
    );
    info!(
        "Batch sizes: email {}, notification {}, warm-up {} ({}ms between batches)",
        args.jobs.email_batch_size,
        args.jobs.notification_batch_size,
        args.jobs.warmup_batch_size,
        args.jobs.batch_delay_ms
    );
    info!("Job history: {} entries", args.jobs.job_history_capacity);
    info!(
        "Build: {} ({})",
        option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown")
    );
    info!("======================================");

    let state = Arc::new(AppState::new(args));

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C");
            shutdown.cancel();
        }
    });

    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

mod app;

use app::AppState;

#[derive(Parser, Debug)]
#[command(name = "gryag", about = "Group-chat assistant with layered memory")]
struct Args {
    /// Path to gryag.toml (default: ./gryag.toml, overridable via GRYAG_CONFIG).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gryag=info".into()),
        )
        .init();

    let args = Args::parse();
    let config_path = args
        .config
        .or_else(|| std::env::var("GRYAG_CONFIG").ok());
    // Config problems are fatal at startup, never at runtime.
    let config = gryag_core::config::GryagConfig::load(config_path.as_deref())?;

    if config.limits.redis_url.is_some() {
        warn!("limits.redis_url is set but no distributed backend is compiled in; using the in-process gate");
    }

    let proactive_enabled = config.proactive.enabled;
    let state = Arc::new(AppState::new(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (proactive_tx, proactive_rx) = mpsc::channel(16);

    let scheduler = gryag_scheduler::Scheduler::new(
        Arc::clone(&state),
        Arc::clone(&state.summarizer),
        proactive_enabled.then_some(proactive_tx),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let adapter = gryag_telegram::TelegramAdapter::new(Arc::clone(&state));
    let adapter_task =
        tokio::spawn(adapter.run(proactive_enabled.then_some(proactive_rx)));

    info!("gryag is up");
    tokio::signal::ctrl_c().await?;
    info!("shutdown: stopping inbound polling");

    // Inbound stops first; background loops observe the signal at the top
    // of their next tick and get a bounded drain window.
    adapter_task.abort();
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(10), scheduler_task)
        .await
        .is_err()
    {
        warn!("scheduler did not stop within 10 s, exiting anyway");
    }

    info!("bye");
    Ok(())
}

//! saga-lock CLI - run three workers against the shared store.

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use saga_lock::{Orchestrator, OrchestratorConfig, Variant};

#[derive(Parser)]
#[command(name = "saga-lock")]
#[command(about = "Fork workers that race for items in a shared store")]
#[command(version)]
struct Cli {
    /// Serialize workers behind a single-permit semaphore
    #[arg(long)]
    enable_lock: bool,
}

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("SAGA_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("saga_lock={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let variant = Variant::from_lock_flag(cli.enable_lock);
    let orchestrator = Orchestrator::new(OrchestratorConfig::new(variant))
        .context("failed to set up orchestrator")?;

    orchestrator.store().subscribe(|state| {
        tracing::info!(target: "saga_lock::store", %state, "Store changed");
    });

    tracing::debug!(variant = %orchestrator.variant(), "Orchestrator ready");
    let report = orchestrator.run().await;

    let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
    println!("{json}");

    let unexpected: Vec<String> = report.unexpected_failures().map(ToString::to_string).collect();
    if !unexpected.is_empty() {
        bail!("{} worker(s) failed: {}", unexpected.len(), unexpected.join("; "));
    }
    Ok(())
}

use anyhow::{Context, Result};
use clap::Parser;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::Command;
use wel_collector::adapters::rf::MemcacheCache;
use wel_collector::bridge::{run_bridge, BridgeOptions};
use wel_collector::cli::BridgeArgs;
use wel_collector::config::Config;
use wel_collector::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse();
    let config = Config::from_env()?;
    init_tracing("rtl-bridge", config.otlp_endpoint.as_deref())?;

    let cache_url = config
        .cache_url
        .clone()
        .context("WEL_CACHE_URL is required for the RF bridge")?;
    let cache = MemcacheCache::new(cache_url, config.retry_policy().timeout);
    let window = Duration::from_secs(args.window_secs.max(1));
    let options = BridgeOptions {
        key: config.rf_cache_key.clone(),
        window,
        // Outlive a missed window so the collector sees the last good snapshot.
        expiry: window.max(config.rf_max_age()),
    };

    let (program, program_args) = args
        .command
        .split_first()
        .context("decoder command is empty")?;
    let mut child = Command::new(program)
        .args(program_args)
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;
    let stdout = child
        .stdout
        .take()
        .context("decoder stdout was not captured")?;
    tracing::info!(program = %program, window_secs = window.as_secs(), key = %options.key, "RF bridge started");

    let outcome = run_bridge(BufReader::new(stdout), &cache, &options, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    })
    .await
    .with_context(|| format!("{program} stopped"));

    let _ = child.kill().await;
    outcome
}

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use wel_collector::backfill;
use wel_collector::cli::{self, BackfillArgs, CollectArgs, Command, ReportArgs};
use wel_collector::config::Config;
use wel_collector::logging::init_tracing;
use wel_collector::report;
use wel_collector::state::CollectorState;
use wel_collector::store::PersistenceWriter;

async fn collect(config: Config, args: CollectArgs) -> Result<()> {
    let state = CollectorState::connect(config, args.dry_run).await?;
    let mut scheduler = state.scheduler();

    if args.once {
        let report = scheduler.tick().await;
        tracing::info!(
            timestamp = %report.captured_at,
            outcome = ?report.outcome,
            fields = report.record.len(),
            "single cycle finished"
        );
        if args.dry_run {
            println!(
                "{}",
                serde_json::to_string_pretty(&report.record.to_document())?
            );
        }
        return Ok(());
    }

    scheduler
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}

async fn history(config: Config, args: ReportArgs) -> Result<()> {
    let (start, end) = report::resolve_range(args.hours, args.start, args.end, Utc::now())?;
    let state = CollectorState::connect(config, false).await?;
    let history = report::build_report(state.store.as_ref(), start, end, &state.batch_options())
        .await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&history).context("failed to encode report")?
    );
    Ok(())
}

async fn load_history(config: Config, args: BackfillArgs) -> Result<()> {
    let state = CollectorState::connect(config, args.dry_run).await?;
    let body = match (&args.file, args.month) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, Some(month)) => {
            backfill::download_log(&state.http, &state.config.log_base_url, month).await?
        }
        (None, None) => anyhow::bail!("backfill needs --month or --file"),
    };
    let log = backfill::parse_log(&body)?;
    let writer = PersistenceWriter::new(state.store.clone());
    let summary = backfill::backfill(
        log,
        &state.config.location(),
        &state.config.cop,
        &writer,
    )
    .await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let config = Config::from_env()?;
    init_tracing("wel-collector", config.otlp_endpoint.as_deref())?;

    match args.into_command() {
        Command::Collect(collect_args) => collect(config, collect_args).await,
        Command::Report(report_args) => history(config, report_args).await,
        Command::Backfill(backfill_args) => load_history(config, backfill_args).await,
    }
}

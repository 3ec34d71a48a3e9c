use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use tracing::info;

use finlife_pipeline::config::PipelineConfig;
use finlife_pipeline::orchestrator;
use finlife_pipeline::util::db::Db;
use finlife_pipeline::util::env as env_util;

/// One scheduled pass of the finance-products pipeline. The hosting
/// scheduler triggers this binary once daily; it performs a single run and
/// exits nonzero on any stage failure.
#[derive(Debug, Parser)]
#[command(name = "finpipe")]
struct Args {
    /// Collection date override (YYYY-MM-DD); defaults to today in KST.
    /// Re-running for the same date overwrites instead of duplicating.
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Database pool size.
    #[arg(long, default_value_t = 5)]
    max_conns: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = PipelineConfig::from_env().context("configuration invalid")?;

    let db = Db::connect(&cfg.database_url, args.max_conns)
        .await
        .context("database connect failed")?;

    let run_date = args.date.unwrap_or_else(orchestrator::kst_today);
    let summary = orchestrator::run(&cfg, &db, run_date).await?;

    info!(
        run_date = %summary.run_date,
        normalized = summary.normalized,
        upserted = summary.upserted,
        decision = ?summary.decision,
        emails_sent = summary.emails_sent,
        "pipeline run complete"
    );
    Ok(())
}

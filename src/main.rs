//! rss-digest: binary entrypoint.
//! Loads the config, sets up tracing (and the optional status server), then
//! dispatches one CLI subcommand.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rss_digest::analyze::ai_adapter::build_completion_client;
use rss_digest::config::AppConfig;
use rss_digest::ledger::DeliveryLedger;
use rss_digest::metrics::Metrics;
use rss_digest::pipeline::Pipeline;
use rss_digest::scheduler::{run_scheduler, Trigger};
use rss_digest::{logging, run_ai_quick_probe};

#[derive(Debug, Parser)]
#[command(name = "rss-digest", version, about = "Periodic RSS digest pusher")]
struct Cli {
    /// Config file (falls back to APP_CONFIG_PATH, then config/app.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
enum Command {
    /// Run on the configured schedule until Ctrl-C (default)
    Run,
    /// Run the pipeline once and exit
    Once,
    /// Check every enabled notifier (and the AI service when enabled)
    Test,
    /// Print delivery statistics
    Stats,
    /// Delete delivery records older than N days
    Cleanup {
        /// Defaults to `ledger.retention_days`
        #[arg(long)]
        days: Option<u32>,
    },
    /// List the most recent delivery records
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("rss-digest error: {error:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load .env if present; no-op otherwise.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let path = AppConfig::resolve_path(cli.config.clone());
    let cfg = AppConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    logging::init_tracing(&cfg.logging);

    let status = if cfg.status.enabled {
        let m = Metrics::init()?;
        Some(m.serve(&cfg.status.bind).await?)
    } else {
        None
    };

    let res = dispatch(cli.command.unwrap_or(Command::Run), &cfg).await;
    if let Some(h) = status {
        h.abort();
    }
    res
}

async fn dispatch(command: Command, cfg: &AppConfig) -> anyhow::Result<()> {
    match command {
        Command::Run => {
            let mut pipeline = Pipeline::from_config(cfg)?;
            if !cfg.scheduler.enabled {
                tracing::warn!("scheduler disabled; running once");
                pipeline.run_once().await;
                pipeline.ledger_mut().close();
                return Ok(());
            }
            let trigger = Trigger::from_config(&cfg.scheduler, cfg.utc_offset());
            run_scheduler(&mut pipeline, trigger, async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = ?e, "cannot listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            })
            .await;
        }
        Command::Once => {
            let mut pipeline = Pipeline::from_config(cfg)?;
            let summary = pipeline.run_once().await;
            pipeline.ledger_mut().close();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Test => {
            let pipeline = Pipeline::from_config(cfg)?;
            let mut failed = 0usize;
            for n in pipeline.notifiers() {
                let outcome = n.test_connection().await;
                let mark = if outcome.success { "✓" } else { "✗" };
                println!("{mark} {}: {}", n.name(), outcome.message);
                if !outcome.success {
                    failed += 1;
                }
            }
            if cfg.ai_enabled() {
                let client = build_completion_client(&cfg.ai)?;
                match run_ai_quick_probe(client.as_ref(), &cfg.stage1_profile().model).await {
                    Ok(()) => println!("✓ ai ({}): reachable", client.provider_name()),
                    Err(e) => {
                        println!("✗ ai ({}): {e:#}", client.provider_name());
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} connection test(s) failed");
            }
        }
        Command::Stats => {
            let mut ledger = DeliveryLedger::new(&cfg.ledger.path);
            let s = ledger.statistics();
            println!("total:            {}", s.total);
            println!("successful:       {}", s.success_count);
            println!("failed:           {}", s.failure_count);
            println!("today (UTC):      {}", s.delivered_today);
            println!("last 7 days:      {}", s.delivered_this_week);
            println!(
                "last delivery:    {}",
                s.last_delivered_at
                    .map(|t| t.with_timezone(&cfg.utc_offset()).to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
        }
        Command::Cleanup { days } => {
            let days = days.unwrap_or(cfg.ledger.retention_days);
            let mut ledger = DeliveryLedger::new(&cfg.ledger.path);
            let removed = ledger.cleanup(days)?;
            println!("removed {removed} record(s) older than {days} day(s)");
        }
        Command::History { limit } => {
            let mut ledger = DeliveryLedger::new(&cfg.ledger.path);
            let offset = cfg.utc_offset();
            for r in ledger.recent(limit) {
                println!(
                    "{}  {:<9} {}  {}",
                    r.delivered_at.with_timezone(&offset).format("%Y-%m-%d %H:%M"),
                    r.channel_name,
                    if r.success { "ok  " } else { "FAIL" },
                    r.title
                );
            }
        }
    }
    Ok(())
}

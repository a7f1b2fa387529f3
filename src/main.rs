//! Tracewell agent CLI
//!
//! Runs the telemetry distillation pipeline against a capture source piped
//! in over stdin, or against a synthetic workload for trying things out.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracewell::buffer::RecordBuffer;
use tracewell::config::Config;
use tracewell::llm::HttpSummaryClient;
use tracewell::pipeline::{ContinuationJudge, GapOnlyJudge, LlmJudge, PipelineCoordinator};
use tracewell::record::RawRecord;
use tracewell::store::{JsonlGateway, PersistenceGateway};
use tracewell::{SummaryClient, VERSION};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tracewell-agent")]
#[command(version = VERSION)]
#[command(about = "Distills interaction telemetry into summarized events and activities", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline, reading raw-record batches from stdin
    ///
    /// Each input line is a JSON array of raw records (one batch). The
    /// capture source is whatever writes those lines.
    Run {
        /// Skip the semantic continuation judgment (gap rule only)
        #[arg(long)]
        no_llm: bool,
    },

    /// Feed a synthetic workload through the pipeline and print the result
    Simulate {
        /// Number of typing bursts to generate
        #[arg(long, default_value = "3")]
        bursts: usize,
    },

    /// Show recently persisted events and activities
    Recent {
        /// How many of each to show
        #[arg(long, short, default_value = "10")]
        limit: usize,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { no_llm } => cmd_run(no_llm).await,
        Commands::Simulate { bursts } => cmd_simulate(bursts).await,
        Commands::Recent { limit } => cmd_recent(limit).await,
        Commands::Config => cmd_config(),
    }
}

fn build_coordinator(config: &Config, no_llm: bool) -> Result<PipelineCoordinator> {
    let client: Arc<dyn SummaryClient> =
        Arc::new(HttpSummaryClient::new(&config.llm).context("failed to build summary client")?);
    let judge: Arc<dyn ContinuationJudge> = if no_llm {
        Arc::new(GapOnlyJudge)
    } else {
        Arc::new(LlmJudge::new(
            Arc::clone(&client),
            config.summarizer.call_timeout,
        ))
    };
    let gateway: Arc<dyn PersistenceGateway> = Arc::new(
        JsonlGateway::open(&config.data_path).context("failed to open data directory")?,
    );

    Ok(PipelineCoordinator::new(config, client, judge, gateway))
}

async fn cmd_run(no_llm: bool) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    config
        .ensure_directories()
        .context("could not create data directories")?;

    println!("Tracewell agent v{VERSION}");
    println!("  Data path: {}", config.data_path.display());
    println!("  Summarization endpoint: {}", config.llm.base_url);
    println!(
        "  Event gap threshold: {}s",
        config.filter.event_gap_threshold.as_secs()
    );
    println!(
        "  Activity gap threshold: {}s",
        config.aggregator.activity_gap_threshold.as_secs()
    );
    println!();
    println!("Reading raw-record batches from stdin (one JSON array per line).");
    println!("Press Ctrl+C to stop.");
    println!();

    let coordinator = build_coordinator(&config, no_llm)?;
    coordinator.start()?;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut buffer = RecordBuffer::new(config.buffer.capacity, config.buffer.overflow);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        let batch: Vec<RawRecord> = match serde_json::from_str(&line) {
                            Ok(batch) => batch,
                            Err(e) => {
                                warn!(error = %e, "skipping malformed batch line");
                                continue;
                            }
                        };
                        let total = batch.len();
                        let accepted = buffer.push_batch(batch);
                        if accepted < total {
                            warn!(
                                rejected = total - accepted,
                                "record buffer refused part of the batch"
                            );
                        }
                        match coordinator.process_raw_records(buffer.drain()).await {
                            Ok(outcome) => {
                                for event in &outcome.events {
                                    info!(
                                        records = event.record_count(),
                                        fallback = event.fallback,
                                        "event: {}",
                                        event.summary
                                    );
                                }
                            }
                            Err(e) => warn!(error = %e, "batch processing failed"),
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopping...");
                break;
            }
        }
    }

    coordinator.stop().await.context("pipeline stop failed")?;
    if buffer.dropped_count() > 0 {
        println!("Buffer shed {} records under load.", buffer.dropped_count());
    }
    println!("{}", coordinator.stats_summary());
    Ok(())
}

async fn cmd_simulate(bursts: usize) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    config.ensure_directories()?;

    // The simulation exercises the whole pipeline without an LLM endpoint:
    // summaries degrade to deterministic fallbacks and merging is gap-only.
    let coordinator = build_coordinator(&config, true)?;
    coordinator.start()?;

    let base = chrono::Utc::now();
    for burst in 0..bursts {
        let start = base + chrono::Duration::seconds(burst as i64 * 30);
        let batch: Vec<RawRecord> = (0..10)
            .map(|i| {
                RawRecord::new(
                    start + chrono::Duration::milliseconds(i * 400),
                    tracewell::record::RecordPayload::Keyboard {
                        key: "a".to_string(),
                        repeat: false,
                    },
                )
            })
            .collect();

        let outcome = coordinator.process_raw_records(batch).await?;
        for event in &outcome.events {
            println!(
                "[burst {}] event with {} records: {}",
                burst + 1,
                event.record_count(),
                event.summary
            );
        }
        if outcome.merged {
            println!("[burst {}] merged into the open activity", burst + 1);
        }
    }

    coordinator.stop().await?;
    println!();
    println!("{}", coordinator.stats_summary());
    Ok(())
}

async fn cmd_recent(limit: usize) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let gateway = JsonlGateway::open(&config.data_path).context("failed to open data directory")?;

    let activities = gateway.recent_activities(limit).await?;
    println!("Recent activities ({}):", activities.len());
    for activity in &activities {
        println!(
            "  [{} - {}] {} ({} events{})",
            activity.start_time.format("%Y-%m-%d %H:%M"),
            activity.end_time.format("%H:%M"),
            activity.title,
            activity.event_count(),
            if activity.open { ", open" } else { "" }
        );
    }

    let events = gateway.recent_events(limit).await?;
    println!();
    println!("Recent events ({}):", events.len());
    for event in &events {
        println!(
            "  [{}] {}{}",
            event.start_time.format("%H:%M:%S"),
            event.summary,
            if event.fallback { " (fallback)" } else { "" }
        );
    }

    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    println!("Config file: {}", Config::config_path().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

//! Peer session analysis CLI for gossip network trace feeds.
//!
//! Replays one or more JSON-lines trace feeds and writes JSON and text
//! reports describing every peer's sessions, goodbye reasons and client mix.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use env_logger::Env;
use log::info;

use peerscore::config::{self, Config};
use peerscore::report;
use peerscore::tool::PeerScoreTool;

/// Peer session analysis for gossip network trace feeds
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON-lines trace feeds to ingest
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for reports (overrides report.output_dir)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,

    /// Seconds between status lines (overrides ingest.status_interval)
    #[arg(long)]
    status_interval: Option<u64>,
}

/// Load the configuration file, if any, and apply CLI overrides.
fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    if let Some(output) = &args.output {
        config.report.output_dir = output.clone();
    }
    if let Some(secs) = args.status_interval {
        config.ingest.status_interval = Duration::from_secs(secs);
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let config = resolve_config(&args)?;
    info!("Ingesting {} trace feed(s)", args.inputs.len());
    info!("Output directory: {:?}", config.report.output_dir);

    let tool = PeerScoreTool::new(config)?;
    let summary = tool.ingest_files(&args.inputs)?;
    tool.log_status();

    let report = tool.generate_report(&summary);
    let report_config = &tool.config().report;

    fs::create_dir_all(&report_config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            report_config.output_dir.display()
        )
    })?;
    report::generate_json_report(&report, &report_config.json_path())?;
    report::generate_text_report(&report, &report_config.text_path())?;
    report::print_summary(&report);

    Ok(())
}

//! CLI entry point for the efa2gtfs converter.
//!
//! Provides subcommands for converting a directory of departure-monitor
//! snapshots into a static GTFS feed, and for crawling the snapshots from an
//! EFA endpoint in the first place.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use efa2gtfs::config::{ConvertConfig, CrawlConfig};
use efa2gtfs::crawler::EfaCrawler;
use efa2gtfs::extract::Converter;
use efa2gtfs::writer;
use tracing::warn;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "efa2gtfs")]
#[command(about = "Converts EFA departure-monitor snapshots into a static GTFS feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a directory of DM response snapshots into a GTFS feed
    Convert {
        /// Directory containing *.json DM response snapshots
        #[arg(short, long, default_value = "data")]
        input_dir: PathBuf,

        /// Directory to write the GTFS text files to
        #[arg(short, long, default_value = "gtfs")]
        output_dir: PathBuf,

        /// Path of the zipped GTFS bundle
        #[arg(short, long, default_value = "gtfs.zip")]
        zip: PathBuf,

        /// Optional JSON file with ignore lists and manual override tables
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Crawl departures from an EFA endpoint into snapshot files
    Crawl {
        /// JSON crawler configuration (base URL, stops file, pacing)
        #[arg(short, long, default_value = "crawl.json")]
        config: String,

        /// Start of the crawl window, e.g. 2018-06-01T04:00
        #[arg(long)]
        start: String,

        /// End of the crawl window
        #[arg(long)]
        end: String,

        /// Directory to save snapshots to
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/efa2gtfs.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("efa2gtfs.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input_dir,
            output_dir,
            zip,
            config,
        } => {
            let config = match config {
                Some(path) => ConvertConfig::load(&path)?,
                None => ConvertConfig::default(),
            };
            let mut converter = Converter::new(config);
            let summary = converter.convert_dir(&input_dir)?;
            if summary.files_failed > 0 {
                warn!(
                    failed = summary.files_failed,
                    attempted = summary.files_attempted,
                    "Some snapshots could not be converted"
                );
            }
            writer::export(&converter.store, &output_dir, &zip)?;
        }
        Commands::Crawl {
            config,
            start,
            end,
            data_dir,
        } => {
            let config = CrawlConfig::load(&config)?;
            let start = parse_window_bound(&start)?;
            let end = parse_window_bound(&end)?;
            EfaCrawler::new(config)
                .load_trips_between(start, end, &data_dir)
                .await?;
        }
    }

    Ok(())
}

fn parse_window_bound(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .map_err(|e| anyhow::anyhow!("invalid date-time {raw:?} (expected YYYY-MM-DDTHH:MM): {e}"))
}

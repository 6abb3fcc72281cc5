use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use snapmem_core::cancel::CancellationToken;
use snapmem_core::config::{self, CONFIG_FILENAME};
use snapmem_core::{RunControl, RunOptions};
use tracing_subscriber::EnvFilter;

/// Exit code after Ctrl-C, as a shell would report SIGINT
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "snapmem", version, about = "Download exported Snapchat memories with their capture dates restored")]
struct Cli {
    /// Configuration file (default: ./configuration.json when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exported memories history (memories_history.html or .json)
    #[arg(long)]
    history: Option<PathBuf>,

    /// Download folder
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// ExifTool executable or name on PATH
    #[arg(long)]
    exiftool: Option<String>,

    /// Seconds between two requests
    #[arg(long)]
    cooldown: Option<u64>,

    /// Attempts per request before giving up on an entry
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Re-stamp entries that are already downloaded
    #[arg(long)]
    restamp: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_options(cli: &Cli) -> anyhow::Result<RunOptions> {
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
    let mut options = if cli.config.is_some() || config_path.exists() {
        config::load_config(&config_path)?
    } else {
        match (&cli.history, &cli.output) {
            (Some(history), Some(output)) => RunOptions::new(history.clone(), output.clone(), "exiftool"),
            _ => anyhow::bail!(
                "No {} found; pass --config, or both --history and --output",
                CONFIG_FILENAME
            ),
        }
    };

    if let Some(history) = &cli.history {
        options.history = history.clone();
    }
    if let Some(output) = &cli.output {
        options.output = output.clone();
    }
    if let Some(exiftool) = &cli.exiftool {
        options.exiftool = exiftool.clone();
    }
    if let Some(cooldown) = cli.cooldown {
        options.cooldown_secs = cooldown;
    }
    if let Some(max_attempts) = cli.max_attempts {
        options.max_attempts = max_attempts;
    }
    options.restamp |= cli.restamp;
    Ok(options)
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("snapmem_core={0},snapmem={0}", cli.log_level))),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = load_options(&cli)?;

    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        if !handler_token.is_cancelled() {
            eprintln!("\nStopping after the current entry, run again to resume...");
        }
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .context("Invalid progress template")?,
    );

    let control = RunControl::new().with_cancel_token(token);
    let bar = pb.clone();
    let report = snapmem_core::run_with_control(&options, &control, &move |_stage, current, total, message| {
        bar.set_length(total);
        bar.set_position(current + 1);
        bar.set_message(message.to_string());
    })?;
    pb.finish_and_clear();

    eprintln!("{}", report.summary.render());
    eprintln!(
        "Summary written to {}, failures logged to {} ({} requests)",
        options.summary_path().display(),
        options.failure_log_path().display(),
        report.requests
    );

    if report.cancelled {
        eprintln!("Cancelled; entries not reached will be fetched on the next run.");
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(ExitCode::SUCCESS)
}

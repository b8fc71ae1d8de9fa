//! audiohub-daemon: audio ingestion and delivery daemon.
//!
//! This binary can run in two modes:
//! - Probe mode: report which external tools are usable and exit
//! - Server mode: HTTP server plus background derivation workers

use anyhow::{anyhow, Context};

use audiohub_daemon::cli::Cli;
use audiohub_daemon::config::DaemonConfig;
use audiohub_daemon::derive::Toolchain;
use audiohub_daemon::http::{run_server, AppState};
use audiohub_daemon::logging::init_tracing;
use audiohub_daemon::pipeline::Pipeline;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_tracing();

    let mut config = DaemonConfig::from_env();
    cli.apply(&mut config);
    if let Some(problem) = config.validate() {
        return Err(anyhow!("invalid configuration: {}", problem));
    }

    let tools = Toolchain::probe(&config).await;

    if cli.is_probe_mode() {
        print_probe(&config, &tools);
        return Ok(());
    }

    run_server_mode(config, tools).await
}

/// Runs the HTTP server until Ctrl-C, then drains the workers.
async fn run_server_mode(config: DaemonConfig, tools: Toolchain) -> anyhow::Result<()> {
    tracing::info!(
        media_root = %config.effective_media_root().display(),
        data_dir = %config.effective_data_dir().display(),
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "starting audiohub-daemon"
    );

    let pipeline = Pipeline::open(config, &tools)
        .await
        .context("failed to open track store")?;
    let runner = pipeline.start_jobs();
    let state = AppState::new(pipeline, runner.queue());

    let served = run_server(state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
        }
    })
    .await;

    runner.shutdown().await;
    served.context("HTTP server failed")?;
    Ok(())
}

/// Prints the probe report.
fn print_probe(config: &DaemonConfig, tools: &Toolchain) {
    let found = |bin: &Option<String>| match bin {
        Some(path) => format!("available ({})", path),
        None => "not found".to_string(),
    };
    eprintln!("=== audiohub-daemon tool probe ===");
    eprintln!("ffmpeg: {}", found(&tools.ffmpeg));
    eprintln!("audiowaveform: {}", found(&tools.audiowaveform));
    eprintln!(
        "Waveforms: {}",
        if tools.audiowaveform.is_some() {
            "extracted"
        } else {
            "placeholder"
        }
    );
    eprintln!(
        "HLS: {}",
        if tools.ffmpeg.is_some() {
            "enabled"
        } else {
            "unavailable"
        }
    );
    eprintln!("Media root: {}", config.effective_media_root().display());
    eprintln!("Data directory: {}", config.effective_data_dir().display());
}

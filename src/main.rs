//! Application entry point for webm-convert.
//!
//! # Startup sequence
//!
//! 1. Parse the command line.
//! 2. Initialise logging.
//! 3. Load [`AppConfig`] and apply CLI overrides.
//! 4. Create the [`tokio`] runtime.
//! 5. Open and validate the input file.
//! 6. Preload the engine, then convert with a live progress line. Ctrl-C
//!    cancels the running conversion.
//! 7. Write the output and print the WebM inspection summary, checked
//!    against the codec the configured profile produces.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use webm_convert::{
    config::AppConfig,
    converter::{BridgeSettings, VideoConverter},
    intake::VideoFile,
    pipeline::{ConversionManager, ConversionState},
    ui::TerminalUi,
    webm,
    worker::{codec_tag, WorkerSpec},
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "webm-convert")]
#[command(author, version, about = "Convert a video file to WebM")]
struct Cli {
    /// Video file to convert
    #[arg(required = true)]
    input: PathBuf,

    /// Directory the converted file is written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Engine artifact location: a directory, an http(s) base URL, or "system"
    #[arg(long)]
    engine_location: Option<String>,

    /// Conversion timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };

    if let Some(dir) = &cli.output_dir {
        config.output.directory = Some(dir.clone());
    }
    if let Some(location) = &cli.engine_location {
        config.engine.base_location = location.clone();
    }
    if let Some(secs) = cli.timeout {
        config.conversion.exec_timeout_secs = secs;
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// Conversion run
// ---------------------------------------------------------------------------

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;

    let spec = WorkerSpec::from_config(&config);
    let converter = Arc::new(VideoConverter::new(
        spec,
        BridgeSettings::from_config(&config),
    ));
    let mut manager = ConversionManager::new(
        Arc::clone(&converter),
        TerminalUi::new(),
        config.output.resolve(),
        config.intake.max_file_size_mb,
    );

    let file = match VideoFile::open(&cli.input).await {
        Ok(file) => file,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    if manager.handle_file_selected(file).is_err() {
        return Ok(ExitCode::FAILURE);
    }

    if !manager.preload().await {
        return Ok(ExitCode::FAILURE);
    }

    // Ctrl-C cancels the running conversion; the manager then reports the
    // canceled state.
    let ctrl_c = tokio::spawn({
        let converter = Arc::clone(&converter);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl-C received, cancelling");
                converter.cancel();
            }
        }
    });

    let state = manager.handle_convert().await;
    ctrl_c.abort();

    match state {
        ConversionState::Completed => {}
        ConversionState::Cancelled => return Ok(ExitCode::from(130)),
        _ => return Ok(ExitCode::FAILURE),
    }

    let Some(path) = manager
        .handle_download()
        .await
        .context("failed to write the converted file")?
    else {
        return Ok(ExitCode::FAILURE);
    };

    let Some(result) = manager.converted() else {
        return Ok(ExitCode::FAILURE);
    };
    let report = webm::inspect(&result.output_bytes);
    let expected = codec_tag(&config.conversion.profile);
    let codec_matches = report.video_codec() == Some(expected);

    println!("Output: {}", path.display());
    println!(
        "Size:   {}",
        webm_convert::intake::format_file_size(result.output_bytes.len() as u64)
    );
    println!("Codec:  {}", report.video_codec().unwrap_or("unknown"));
    println!("Audio:  {}", if report.has_audio { "yes" } else { "no" });
    for error in &report.errors {
        println!("Check:  {error}");
    }
    if report.is_webm && !codec_matches {
        println!("Check:  expected {expected} for the configured profile");
    }

    converter.destroy();
    Ok(if report.is_valid() && codec_matches {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logging
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    log::info!("webm-convert starting up");

    // Tokio runtime (2 worker threads: the execution context and the caller)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(cli))
}

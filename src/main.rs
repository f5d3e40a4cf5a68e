//! Jimaku - Local Multilingual Subtitle Generation
//!
//! Main entry point. Detects hardware, builds the processing pipeline and
//! dispatches the CLI commands, including the hidden `worker` subcommand
//! this binary re-invokes on itself for isolated translation.

use anyhow::Result;
use clap::Parser;
use tracing::{Level, info};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jimaku::cli::{Args, Commands};
use jimaku::config::Config;
use jimaku::hardware::{self, NvidiaSmiProbe};
use jimaku::media::FfmpegProcessor;
use jimaku::model::{ModelKind, ModelManager};
use jimaku::pipeline::Pipeline;
use jimaku::providers::{SeparatorBackend, WhisperBackend};
use jimaku::worker::run_worker;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("jimaku.toml").exists() {
                info!("Found jimaku.toml in current directory, loading...");
                Config::from_file("jimaku.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Process {
            input,
            batch_size,
            beam_size,
        } => {
            if let Some(batch) = batch_size {
                config.performance.batch_size = Some(batch);
            }
            if let Some(beam) = beam_size {
                config.performance.beam_size = Some(beam);
            }

            let media = FfmpegProcessor::new(config.media.clone());
            media.check_availability()?;

            let descriptor = hardware::detect(&NvidiaSmiProbe);
            let profile = hardware::select_profile(&descriptor, config.translate.num_beams)
                .with_overrides(&config.performance);
            info!(
                "Performance profile: tier {} on {}, batch {}, beam {}, {}",
                profile.tier,
                profile.device,
                profile.max_batch_size,
                profile.beam_size,
                profile.precision
            );

            let mut manager = ModelManager::new(profile);
            manager.register(
                ModelKind::Transcription,
                Box::new(WhisperBackend::new(config.whisper.clone())),
            );
            if config.whisper.use_vocal_separation {
                manager.register(
                    ModelKind::VocalSeparation,
                    Box::new(SeparatorBackend::new(config.separator.clone())),
                );
            }

            let mut pipeline = Pipeline::new(config, Box::new(media), manager);
            let summary = pipeline.process_path(&input).await?;
            println!(
                "Done: {} processed, {} skipped, {} failed",
                summary.processed, summary.skipped, summary.failed
            );
        }
        Commands::Probe => {
            let descriptor = hardware::detect(&NvidiaSmiProbe);
            println!("Architecture:    {}", descriptor.arch);
            println!("Logical CPUs:    {}", descriptor.logical_cpus);
            match &descriptor.accelerator {
                Some(accelerator) => {
                    println!("Accelerator:     {}", accelerator.name);
                    println!(
                        "Memory:          {:.1} GB",
                        descriptor.accelerator_memory_gb().unwrap_or(0.0)
                    );
                }
                None => println!("Accelerator:     none"),
            }

            let profile = hardware::select_profile(&descriptor, config.translate.num_beams)
                .with_overrides(&config.performance);
            println!();
            println!("Profile tier:    {}", profile.tier);
            println!("Device:          {}", profile.device);
            println!("Precision:       {}", profile.precision);
            println!("Max batch size:  {}", profile.max_batch_size);
            println!("Beam size:       {}", profile.beam_size);
            println!("Threads:         {}", profile.thread_count);
        }
        Commands::Languages => {
            println!("{:<6} {:<12} {}", "ISO", "NLLB", "Label");
            println!("{}", "-".repeat(40));
            for (iso, target) in &config.languages {
                println!("{:<6} {:<12} {}", iso, target.code, target.label);
            }
        }
        Commands::Init { output } => {
            Config::default().save_to_file(&output)?;
            println!("Wrote default configuration to {}", output.display());
        }
        Commands::Worker { manifest } => {
            run_worker(&manifest).await?;
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".jimaku").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "jimaku.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

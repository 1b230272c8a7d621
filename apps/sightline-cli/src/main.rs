mod commands;
mod live;
mod ui;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sightline_ops::init_tracing;
use sightline_types::config::SightlineConfig;

const DEFAULT_CONFIG: &str = "configs/dev.toml";

#[derive(Debug, Parser)]
#[command(name = "sightline", version, about = "Camera and image front-end for a remote object-detection backend")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "SIGHTLINE_CONFIG")]
    config: Option<PathBuf>,
    /// Override the backend base URL.
    #[arg(long)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check whether the backend has its model loaded.
    Health,
    /// Show the backend model and its classes.
    Model,
    /// Run single-shot detection on an image file.
    Detect {
        image: PathBuf,
        #[arg(long)]
        confidence: Option<f32>,
        #[arg(long)]
        iou: Option<f32>,
        /// Ask the backend to keep the result in its history.
        #[arg(long)]
        save: bool,
        /// Write the image with boxes drawn on it.
        #[arg(long)]
        overlay: Option<PathBuf>,
    },
    /// Upload a video for processing.
    Video {
        file: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Inspect or prune the backend detection history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Run live detection against a camera source.
    Live(live::LiveArgs),
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    List {
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Save the processed image the backend kept for a record.
    Preview {
        id: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Delete {
        id: String,
    },
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli);
    if let Err(err) = init_tracing(&config.ops) {
        eprintln!("logging disabled: {err}");
    }

    let outcome = match cli.command {
        Command::Health => commands::health(&config).await,
        Command::Model => commands::model(&config).await,
        Command::Detect {
            image,
            confidence,
            iou,
            save,
            overlay,
        } => {
            commands::detect(
                &config,
                commands::DetectArgs {
                    image,
                    confidence,
                    iou,
                    save,
                    overlay,
                },
            )
            .await
        }
        Command::Video { file, output } => commands::video(&config, &file, output).await,
        Command::History { action } => match action {
            HistoryAction::List { limit, offset } => {
                commands::history_list(&config, limit, offset).await
            }
            HistoryAction::Preview { id, output } => {
                commands::history_preview(&config, &id, output).await
            }
            HistoryAction::Delete { id } => commands::history_delete(&config, &id).await,
            HistoryAction::Clear => commands::history_clear(&config).await,
        },
        Command::Live(args) => live::run(&config, args).await,
    };

    // Every failure ends up here as one user-facing line.
    if let Err(err) = outcome {
        tracing::error!("{err:#}");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> SightlineConfig {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let loaded = match SightlineConfig::from_file(&path) {
        Ok(cfg) => cfg,
        Err(err) => {
            // A missing default file is normal; anything else is worth a word.
            if cli.config.is_some() || path.exists() {
                eprintln!(
                    "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                    path.display()
                );
            }
            SightlineConfig::default()
        }
    };

    let config = with_overrides(loaded, cli);
    if let Err(err) = config.validate() {
        eprintln!(
            "Invalid config in '{}': {err}. Falling back to internal defaults.",
            path.display()
        );
        let fallback = with_overrides(SightlineConfig::default(), cli);
        if let Err(err) = fallback.validate() {
            eprintln!("Ignoring backend override: {err}");
            return SightlineConfig::default();
        }
        return fallback;
    }
    config
}

/// Environment first, then the command line.
fn with_overrides(mut config: SightlineConfig, cli: &Cli) -> SightlineConfig {
    config.apply_env_overrides();
    if let Some(url) = &cli.api_url {
        config.backend.base_url = url.clone();
    }
    config
}

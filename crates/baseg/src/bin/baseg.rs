use std::path::PathBuf;

use anyhow::Result;
use baseg::{
    burn_backend_types::{InferenceDevice, NAME},
    run_prediction, run_test, run_training, PredictionConfig,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "baseg")]
#[command(about = "Burned-area delineation with an auxiliary land-cover task")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model
    Train {
        /// Experiment configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Evaluate a checkpoint on the test split
    Test {
        /// Experiment configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Checkpoint to evaluate, defaults to the one written by training
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Predict full images with the sliding-window tiler
    Predict {
        /// Experiment configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Model checkpoint, without extension
        #[arg(long)]
        checkpoint: String,

        /// Directory with an image sub-directory
        #[arg(short, long)]
        input: String,

        /// Output directory for the masks
        #[arg(short, long)]
        output: String,

        /// Write binary masks thresholded at this probability
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Show backend information
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train { config } => run_training(&config),
        Commands::Test { config, checkpoint } => {
            run_test(&config, checkpoint)?;
            Ok(())
        }
        Commands::Predict {
            config,
            checkpoint,
            input,
            output,
            threshold,
        } => {
            let prediction =
                PredictionConfig::new(input, output, checkpoint).with_threshold(threshold);
            let written = run_prediction(&config, &prediction)?;
            println!("Wrote {written} masks");
            Ok(())
        }
        Commands::Info => {
            println!("baseg Information:");
            println!("  Backend: {NAME}");
            println!("  Device: {:?}", InferenceDevice::default());
            Ok(())
        }
    }
}

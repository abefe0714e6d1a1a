mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use repairbench_common::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "repairbench-cli")]
#[command(about = "repairbench CLI - Manage model configurations and datasets", long_about = None)]
struct Cli {
    /// Path to models.json
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config/models.json
    Init {
        /// Overwrite an existing config
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Add a model configuration
    AddModel {
        /// Model identifier (e.g., meta-llama/Llama-3.2-3B-Instruct)
        #[arg(short, long)]
        id: String,

        /// Evaluate the quantized build
        #[arg(short, long, default_value = "false")]
        quantize: bool,

        /// Backend identifier of the quantized build
        #[arg(long)]
        quantized_id: Option<String>,
    },

    /// Remove a model configuration
    RemoveModel {
        /// Model identifier
        #[arg(short, long)]
        id: String,

        /// Only remove the quantized (true) or unmodified (false) entry
        #[arg(short, long)]
        quantize: Option<bool>,

        /// Skip confirmation
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// List configured models
    ListModels {
        /// Print as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Load a dataset slice and report malformed records
    CheckDataset {
        /// Dataset path (defaults to the configured one)
        #[arg(short, long)]
        dataset: Option<String>,

        /// First line (1-based, inclusive)
        #[arg(long)]
        start: Option<usize>,

        /// Last line (1-based, inclusive)
        #[arg(long)]
        end: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            commands::init_config(&cli.config, force).await?;
        }
        Commands::AddModel { id, quantize, quantized_id } => {
            commands::add_model(&cli.config, &id, quantize, quantized_id.as_deref()).await?;
        }
        Commands::RemoveModel { id, quantize, yes } => {
            commands::remove_model(&cli.config, &id, quantize, yes).await?;
        }
        Commands::ListModels { json } => {
            commands::list_models(&cli.config, json).await?;
        }
        Commands::CheckDataset { dataset, start, end } => {
            commands::check_dataset(&cli.config, dataset.as_deref(), start, end).await?;
        }
    }

    Ok(())
}

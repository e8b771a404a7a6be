//! CLI - Command-line argument parsing
//!
//! Defines the CLI structure using clap.
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// nlcmd control tool
#[derive(Parser, Debug)]
#[command(name = "nlcmdctl")]
#[command(about = "Validate and run structured command plans", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Path to config file (overrides $NLCMD_CONFIG and defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the actions a plan may use
    Catalog {
        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Check a plan file without running it
    Validate {
        /// Plan file (JSON wire format)
        plan: PathBuf,
    },

    /// Validate and execute a plan file
    Run {
        /// Plan file (JSON wire format)
        plan: PathBuf,

        /// Output format: text, json or table
        #[arg(long, default_value = "text")]
        format: String,

        /// Keep going after a failed step
        #[arg(long)]
        continue_on_error: bool,
    },

    /// Route one classified request (direct action or planner)
    Ask {
        /// Original user text
        text: String,

        /// Classified intent
        #[arg(long, default_value = "unknown")]
        intent: String,

        /// Extracted entity, KEY=VALUE (repeatable)
        #[arg(long = "entity", value_name = "KEY=VALUE")]
        entities: Vec<String>,

        /// Classifier confidence, 0.0-1.0
        #[arg(long, default_value_t = 1.0)]
        confidence: f64,

        /// Output format: text, json or table
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Route many requests concurrently (one JSON request per line)
    Batch {
        /// File of newline-delimited requests
        file: PathBuf,

        /// Output format: text, json or table
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Print the effective configuration as TOML
    Config,
}

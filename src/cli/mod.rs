//! CLI module for vmimport
//!
//! Command-line interface definitions and handlers.
//!
//! # Commands
//!
//! - `run` - Load manifests and run the import controller
//! - `checks` - Show the validation check table
//! - `config` - Configuration utilities (init)
//! - `completions` - Generate shell completions
//!
//! # Example
//!
//! ```bash
//! # Run the imports described in ./manifests
//! vmimport run --manifests ./manifests
//!
//! # Show which checks block an import
//! vmimport checks --json
//!
//! # Generate shell completions
//! vmimport completions bash > ~/.bash_completion.d/vmimport
//! ```

pub mod checks;
pub mod completions;
pub mod config;
pub mod manifests;
pub mod output;
pub mod run;

pub use checks::handle_checks;
pub use completions::handle_completions;
pub use config::handle_config_init;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// vmimport - Virtual machine import controller
#[derive(Parser, Debug)]
#[command(
    name = "vmimport",
    version,
    about = "Import oVirt and VMware virtual machines into cluster-native VMs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load manifests and reconcile every import request
    Run(RunArgs),
    /// Show the validation check table
    Checks(ChecksArgs),
    /// Configuration utilities
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "vmimport.toml")]
    pub config: PathBuf,

    /// Directory of JSON manifests to load into the object store
    #[arg(short, long)]
    pub manifests: PathBuf,

    /// Override the number of reconcile workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "VMIMPORT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Override the probe and metrics port
    #[arg(short, long, env = "VMIMPORT_PORT")]
    pub port: Option<u16>,

    /// Do not serve probes and metrics
    #[arg(long)]
    pub no_server: bool,

    /// Stop after this many seconds even if imports are still running
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ChecksArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Path to configuration file (applies its overrides)
    #[arg(short, long, default_value = "vmimport.toml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Initialize a new configuration file
    Init(ConfigInitArgs),
}

#[derive(Args, Debug)]
pub struct ConfigInitArgs {
    /// Output file path
    #[arg(short, long, default_value = "vmimport.toml")]
    pub output: PathBuf,

    /// Overwrite existing file
    #[arg(short, long)]
    pub force: bool,

    /// Print the template to stdout instead of writing a file
    #[arg(long, conflicts_with = "force")]
    pub stdout: bool,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

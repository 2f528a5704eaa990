use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use crate::{config::Config, error::Error, store::RuleStore};

/// The command line interface for smart response.
#[derive(Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// A JSON rules file to import, overriding the configuration
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Start with rule evaluation enabled
    #[arg(long)]
    pub enable_engine: bool,

    /// Treat lines read from stdin as hex
    #[arg(long)]
    pub hex: bool,

    /// How much tracing to show on stderr
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Tracing verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Only errors.
    Error,

    /// Warnings and errors.
    Warn,

    /// The default.
    Info,

    /// Chatty.
    Debug,

    /// Everything.
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Commands available in the command line interface.
#[derive(Subcommand)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON rules file, as accepted by import.
    Rules,
}

/// The text a command prints.
pub fn handle_command(command: Commands) -> Result<String, Error> {
    match command {
        Commands::Examples(Examples::Config) => Config::example().serialize_pretty(),
        Commands::Examples(Examples::Rules) => RuleStore::seeded().export(),
    }
}

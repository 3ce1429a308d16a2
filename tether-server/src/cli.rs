//! Command-line definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Script-defined HTTP endpoints on an embedded JavaScript runtime", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Database URL, overriding the configuration
    #[arg(long, value_name = "URL", global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address, overriding the configuration (`host` or `host:port`)
        #[arg(short, long, value_name = "ADDR")]
        bind: Option<String>,

        /// Scripts to evaluate at startup, after the configured ones
        #[arg(value_name = "SCRIPT")]
        scripts: Vec<PathBuf>,
    },

    /// Execute one script and print its result as JSON
    Run {
        /// Script file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Session to record the execution under
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// Print the default configuration as YAML
    Config,
}

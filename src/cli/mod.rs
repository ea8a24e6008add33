//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for cohort-extract using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Cohort Extract - PostgreSQL cohort extraction tool
#[derive(Parser, Debug)]
#[command(name = "cohort-extract")]
#[command(version, about, long_about = None)]
#[command(author = "Cohort Extract Contributors")]
pub struct Cli {
    /// Path to the connection configuration file
    #[arg(
        long,
        default_value = "configs/db_connection.toml",
        env = "COHORT_CONNECTION_CONFIG"
    )]
    pub connection: String,

    /// Path to the cohort registry file
    #[arg(long, default_value = "configs/cohorts.toml", env = "COHORT_REGISTRY")]
    pub registry: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "COHORT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract cohorts into an output directory
    Run(commands::run::RunArgs),

    /// Validate the connection configuration and cohort registry
    ValidateConfig(commands::validate::ValidateArgs),

    /// List the cohorts defined in the registry
    ListCohorts(commands::list::ListArgs),

    /// Check the database connection and the tables cohorts reference
    CheckConnection(commands::check_connection::CheckConnectionArgs),

    /// Write sample configuration files
    Init(commands::init::InitArgs),
}

// Cohort Extract - PostgreSQL cohort extraction to Parquet and CSV
// Copyright (c) 2025 Cohort Extract Contributors
// Licensed under the MIT License

use cohort_extract::cli::{Cli, Commands};
use cohort_extract::config::load_config;
use cohort_extract::logging::{init_console_logging, init_logging, LoggingGuard};
use clap::Parser;
use std::process;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let logging_guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(5);
        }
    };

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Cohort Extract - PostgreSQL cohort extraction"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                }
            }
            eprintln!("\n⚠️  Shutdown signal received, finishing committed cohorts...");
            let _ = shutdown_tx.send(true);
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            } else {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                eprintln!("\n⚠️  Shutdown signal received, finishing committed cohorts...");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    let exit_code = match execute_command(&cli, shutdown_rx).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command execution failed");
            eprintln!("Error: {e}");
            5
        }
    };

    // process::exit skips destructors, so flush file logs first
    drop(logging_guard);
    process::exit(exit_code);
}

/// Logging from the connection file when it loads, console-only otherwise
fn setup_logging(cli: &Cli) -> cohort_extract::domain::Result<LoggingGuard> {
    match load_config(&cli.connection) {
        Ok(config) => {
            let level = cli
                .log_level
                .as_deref()
                .unwrap_or(&config.application.log_level);
            init_logging(level, &config.logging)
        }
        Err(_) => {
            init_console_logging(cli.log_level.as_deref().unwrap_or("info"))
        }
    }
}

/// Execute the CLI command
async fn execute_command(cli: &Cli, shutdown_signal: watch::Receiver<bool>) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Run(args) => args.execute(&cli.connection, &cli.registry, shutdown_signal).await,
        Commands::ValidateConfig(args) => args.execute(&cli.connection, &cli.registry).await,
        Commands::ListCohorts(args) => args.execute(&cli.registry).await,
        Commands::CheckConnection(args) => args.execute(&cli.connection, &cli.registry).await,
        Commands::Init(args) => args.execute(&cli.connection, &cli.registry).await,
    }
}

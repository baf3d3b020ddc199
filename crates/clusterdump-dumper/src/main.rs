//! clusterdump - Main entry point

use std::process;

use clap::Parser;
use clusterdump_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clusterdump_dumper::commands::{self, dump::DumpMode};
use clusterdump_dumper::config::DumpConfig;
use clusterdump_dumper::{Cli, Commands, DumpCommand, DumpError};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .output(LogOutput::Console)
        .log_file_prefix("clusterdump")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _ = init_logging(&log_config);

    let code = match execute_command(&cli).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            1
        },
    };

    process::exit(code);
}

/// Execute the CLI command. `Ok(false)` means the command ran but did not
/// fully succeed.
async fn execute_command(cli: &Cli) -> clusterdump_dumper::Result<bool> {
    let mut config = DumpConfig::load(cli.config.as_deref())?;
    config.collector.non_interactive |= cli.non_interactive;

    match &cli.command {
        Commands::Dump { command } => {
            let (args, mode) = match command {
                DumpCommand::Local { args, no_compress } => (
                    args,
                    DumpMode::Local {
                        no_compress: *no_compress,
                    },
                ),
                DumpCommand::Remote { args } => (args, DumpMode::Remote),
            };

            let cancel = CancellationToken::new();
            tokio::spawn(cancel_on_signal(cancel.clone()));

            let outcome = commands::dump::run(config, args, mode, confirm, cancel).await?;
            Ok(outcome.is_success())
        },
        Commands::Ingest {
            archive,
            cluster,
            run_id,
        } => {
            commands::ingest::run(&config, archive, cluster.clone(), *run_id).await?;
            Ok(true)
        },
        Commands::Rehydrate { cluster } => {
            commands::rehydrate::run(&config, cluster.clone()).await?;
            Ok(true)
        },
    }
}

fn confirm(message: &str) -> clusterdump_dumper::Result<bool> {
    inquire::Confirm::new(message)
        .with_default(false)
        .with_help_message("Pass --non-interactive to skip this prompt")
        .prompt()
        .map_err(|e| DumpError::config(format!("confirmation prompt failed: {}", e)))
}

/// Cancel the run on Ctrl+C or SIGTERM; writers are still closed
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Signal received, cancelling dump");
    cancel.cancel();
}

//! Rota CLI - confirm courier actions offline and replay them later
//!
//! Every capture lands in the local queue first; `rota drain` pushes the
//! queue to the remote ledger once the network is back.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::cli::{CaptureCommand, Cli, Commands};
use crate::commands::common::{resolve_db_path, QueueOptions};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "rota=info"
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = QueueOptions {
        db_path: resolve_db_path(cli.db_path)?,
        settings_path: cli.settings,
    };

    match cli.command {
        Commands::Capture { action } => match action {
            CaptureCommand::Delivery { receiver } => {
                commands::capture::run_receiver_capture(
                    rota_core::ActionKind::Delivery,
                    receiver,
                    &options,
                )
                .await?;
            }
            CaptureCommand::Return { receiver } => {
                commands::capture::run_receiver_capture(
                    rota_core::ActionKind::Return,
                    receiver,
                    &options,
                )
                .await?;
            }
            CaptureCommand::Failed { order, reason } => {
                commands::capture::run_failed_capture(order, reason, &options).await?;
            }
            CaptureCommand::Collection { order } => {
                commands::capture::run_collection_capture(order, &options).await?;
            }
        },
        Commands::Drain { json } => commands::drain::run_drain(json, &options).await?,
        Commands::Queue { json } => commands::queue::run_queue(json, &options).await?,
        Commands::Failed { json } => commands::queue::run_failed(json, &options).await?,
        Commands::Discard { id } => commands::queue::run_discard(&id, &options).await?,
        Commands::Handled { barcode } => commands::cache::run_handled(&barcode, &options).await?,
        Commands::ResetCache { rebuild } => {
            commands::cache::run_reset_cache(rebuild, &options).await?;
        }
        Commands::Reconcile => commands::cache::run_reconcile(&options).await?,
        Commands::Completions { shell, output } => {
            commands::completions::run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}

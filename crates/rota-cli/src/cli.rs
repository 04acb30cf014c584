use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use rota_core::ReceiverType;

#[derive(Parser)]
#[command(name = "rota")]
#[command(about = "Confirm deliveries offline and sync them when the network is back")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional JSON file with queue and sync settings
    #[arg(long, global = true, value_name = "PATH")]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a courier action in the local queue
    Capture {
        #[command(subcommand)]
        action: CaptureCommand,
    },
    /// Replay queued actions against the remote ledger
    Drain {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued actions
    Queue {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List actions that stopped retrying
    Failed {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop a failed action
    Discard {
        /// Record ID
        id: String,
    },
    /// Check whether a barcode was already handled
    Handled {
        /// Order barcode
        barcode: String,
    },
    /// Forget every handled barcode
    ResetCache {
        /// Recompute local marks from the queue afterwards
        #[arg(long)]
        rebuild: bool,
    },
    /// Confirm handled barcodes against the remote ledger
    Reconcile,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CaptureCommand {
    /// Order handed to a receiver
    Delivery {
        #[command(flatten)]
        receiver: ReceiverArgs,
    },
    /// Order handed back to the sender
    Return {
        #[command(flatten)]
        receiver: ReceiverArgs,
    },
    /// Delivery attempt that did not succeed
    Failed {
        #[command(flatten)]
        order: OrderArgs,
        /// Why the delivery failed
        #[arg(long)]
        reason: String,
    },
    /// Order picked up for delivery
    Collection {
        #[command(flatten)]
        order: OrderArgs,
    },
}

#[derive(clap::Args)]
pub struct OrderArgs {
    /// Scanned or typed barcode
    pub barcode: String,
    /// Barcode of the order opened on screen; the scan must match it
    #[arg(long, value_name = "BARCODE")]
    pub expected: Option<String>,
    /// Photo of the handover
    #[arg(long, value_name = "PATH")]
    pub photo: Option<PathBuf>,
}

#[derive(clap::Args)]
pub struct ReceiverArgs {
    #[command(flatten)]
    pub order: OrderArgs,
    /// Name of the person who received the order
    #[arg(long)]
    pub receiver: String,
    /// Relation of the receiver to the addressee
    #[arg(long, value_enum, default_value_t = ReceiverKind::Recipient)]
    pub receiver_type: ReceiverKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ReceiverKind {
    #[value(name = "self")]
    Recipient,
    Family,
    Friend,
    Neighbor,
}

impl From<ReceiverKind> for ReceiverType {
    fn from(kind: ReceiverKind) -> Self {
        match kind {
            ReceiverKind::Recipient => Self::Recipient,
            ReceiverKind::Family => Self::Family,
            ReceiverKind::Friend => Self::Friend,
            ReceiverKind::Neighbor => Self::Neighbor,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

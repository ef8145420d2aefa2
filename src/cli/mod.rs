//! CLI argument definitions for TimeJet.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TimeJet - keeps project plans and field updates in sync.
///
/// Import a tenant's project documents with `tj import`, then serve them to
/// field clients with `tj serve`.
#[derive(Parser, Debug)]
#[command(name = "tj")]
#[command(author, version, about = "Synchronize project-plan tasks with field updates", long_about = None)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("TJ_GIT_COMMIT"),
    ", built ",
    env!("TJ_BUILD_TIMESTAMP"),
    ")"
))]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Directory holding one subdirectory per tenant.
    /// Falls back to TJ_DATA_DIR, then the config file, then the user data dir.
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file to read instead of ~/.config/timejet/config.kdl.
    /// Falls back to TJ_CONFIG.
    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile every project document of a tenant into its store
    Import {
        /// Tenant identifier
        tenant: String,

        /// User on whose behalf the import runs
        #[arg(long)]
        user: Option<String>,
    },

    /// List a tenant's project documents
    Projects {
        /// Tenant identifier
        tenant: String,
    },

    /// Print every stored task and user of a tenant
    Dump {
        /// Tenant identifier
        tenant: String,
    },

    /// Apply a field update read from a JSON file or stdin
    Update {
        /// Tenant identifier
        tenant: String,

        /// Payload file, or `-` for stdin
        #[arg(default_value = "-")]
        payload: String,
    },

    /// Render a project report and mail it
    Report {
        /// Tenant identifier
        tenant: String,

        /// Project name (case-insensitive)
        project: String,

        /// Recipient address
        #[arg(long)]
        to: Option<String>,
    },

    /// User activity log
    Activity {
        #[command(subcommand)]
        command: ActivityCommands,
    },

    /// Author and inspect project documents
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },

    /// Run the HTTP service
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Activity subcommands
#[derive(Subcommand, Debug)]
pub enum ActivityCommands {
    /// Append an activity event
    Record {
        /// Tenant identifier
        tenant: String,

        /// User the event belongs to
        #[arg(long)]
        user_id: i64,

        /// Task uid the event refers to
        #[arg(long)]
        uid: i64,

        /// Project name
        #[arg(long)]
        project: String,

        /// start, pause, end, phone, email, meeting or travel
        #[arg(long)]
        kind: String,

        /// Event start (e.g. "2024-05-02 08:00")
        #[arg(long)]
        start: String,

        /// Event finish
        #[arg(long)]
        finish: Option<String>,

        #[arg(long, default_value = "")]
        task_name: String,

        #[arg(long, default_value = "")]
        step_name: String,
    },

    /// List activity events
    List {
        /// Tenant identifier
        tenant: String,

        /// Only events of this user
        #[arg(long)]
        user_id: Option<i64>,
    },
}

/// Document subcommands
#[derive(Subcommand, Debug)]
pub enum DocCommands {
    /// Convert a JSON project description into a document
    Pack {
        /// JSON input
        input: PathBuf,

        /// Document to write
        output: PathBuf,
    },

    /// Print a decoded document
    Show {
        /// Document file
        file: PathBuf,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved settings and where each came from
    Show,
}

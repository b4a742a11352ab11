//! isosync CLI
//!
//! Command-line tools for a file-backed isosync replica.
//!
//! # Commands
//!
//! - `init` - Create a replica file
//! - `add` / `edit` / `delete` / `list` - Work with local records
//! - `status` - Show sync state
//! - `sync` - Push and pull against a remote file
//! - `conflicts` / `resolve` - Handle conflicts queued by the manual strategy
//! - `backoff` - Print a retry schedule

mod commands;
mod files;
mod remote;

use clap::{Parser, Subcommand};
use commands::conflicts::Side;
use commands::init::Preset;
use commands::records::RecordEdit;
use isosync_protocol::ConflictStrategy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// isosync command-line replica tools.
#[derive(Parser)]
#[command(name = "isosync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the replica file
    #[arg(global = true, short, long, default_value = "replica.json")]
    replica: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new replica file
    Init {
        /// Site ID of this device
        #[arg(short, long)]
        site: String,

        /// Sync configuration preset
        #[arg(short, long, value_enum, default_value = "default")]
        preset: Preset,
    },

    /// Add a record
    Add {
        /// Record name
        name: String,

        /// Record body
        #[arg(short, long, default_value = "")]
        body: String,

        /// Tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },

    /// Edit a record
    Edit {
        /// Record ID
        id: String,

        /// New name
        #[arg(short, long)]
        name: Option<String>,

        /// New body
        #[arg(short, long)]
        body: Option<String>,

        /// New summary (empty clears it)
        #[arg(short, long)]
        summary: Option<String>,

        /// Tag to add (repeatable)
        #[arg(long = "add-tag")]
        add_tags: Vec<String>,

        /// Tag to remove (repeatable)
        #[arg(long = "remove-tag")]
        remove_tags: Vec<String>,
    },

    /// Delete a record
    Delete {
        /// Record ID
        id: String,
    },

    /// List records
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show sync state
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Sync with a remote file
    Sync {
        /// Path to the remote file (created if missing)
        #[arg(long)]
        remote: PathBuf,

        /// Conflict strategy (server-wins, local-wins, latest-wins,
        /// field-level-merge, manual); saved to the replica
        #[arg(long)]
        strategy: Option<ConflictStrategy>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List conflicts awaiting manual resolution
    Conflicts {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Resolve a queued conflict
    Resolve {
        /// Conflict ID
        id: String,

        /// Side to keep
        #[arg(long, value_enum)]
        take: Side,
    },

    /// Print the retry delay for each attempt
    Backoff {
        /// Base delay in milliseconds
        #[arg(long, default_value = "1000")]
        base: u64,

        /// Maximum delay in milliseconds
        #[arg(long, default_value = "300000")]
        cap: u64,

        /// Number of attempts
        #[arg(long, default_value = "10")]
        attempts: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let replica = cli.replica.as_path();
    match cli.command {
        Commands::Init { site, preset } => commands::init::run(replica, &site, preset)?,
        Commands::Add { name, body, tags } => commands::records::add(replica, &name, &body, &tags)?,
        Commands::Edit {
            id,
            name,
            body,
            summary,
            add_tags,
            remove_tags,
        } => {
            let changes = RecordEdit {
                name,
                body,
                summary,
                add_tags,
                remove_tags,
            };
            commands::records::edit(replica, &id, changes)?;
        }
        Commands::Delete { id } => commands::records::delete(replica, &id)?,
        Commands::List { format } => commands::records::list(replica, &format)?,
        Commands::Status { format } => commands::status::run(replica, &format)?,
        Commands::Sync {
            remote,
            strategy,
            format,
        } => commands::sync::run(replica, &remote, strategy, &format)?,
        Commands::Conflicts { format } => commands::conflicts::list(replica, &format)?,
        Commands::Resolve { id, take } => commands::conflicts::resolve(replica, &id, take)?,
        Commands::Backoff {
            base,
            cap,
            attempts,
            format,
        } => commands::backoff::run(base, cap, attempts, &format)?,
        Commands::Version => {
            println!("isosync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

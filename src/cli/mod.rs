//! CLI definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// press-sync - Reconcile a WordPress export into a live content store
#[derive(Parser, Debug)]
#[command(name = "psync", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database path (default: ~/.psync/data/live.db)
    #[arg(long, global = true, env = "PSYNC_DB")]
    pub db: Option<PathBuf>,

    /// Config file (default: ~/.psync/config.json)
    #[arg(long, global = true, env = "PSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Actor name for the audit trail
    #[arg(long, global = true, env = "PSYNC_ACTOR")]
    pub actor: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Plan and report without writing to the live store
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the live store database and a default config
    Init {
        /// Recreate an existing database
        #[arg(long)]
        force: bool,
    },

    /// Reconcile an export snapshot into the live store
    Sync(SyncArgs),

    /// List orphan and duplicate candidates without changing anything
    Orphans {
        /// Extra category titles to treat as protected
        #[arg(long = "protect", value_name = "TITLE")]
        protect: Vec<String>,
    },

    /// Delete orphan candidates (requires --confirm)
    Prune(PruneArgs),

    /// Category hierarchy maintenance
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Show live store counts and recent activity
    Status {
        /// Number of recent events to show
        #[arg(long, default_value_t = 10)]
        events: u32,
    },

    /// Print version information
    Version,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Path to the WXR export file
    pub export: PathBuf,

    /// Operations per batch (overrides config)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between batches in milliseconds (overrides config)
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Directory for the JSON report artifact (overrides config)
    #[arg(long, value_name = "DIR")]
    pub report: Option<PathBuf>,

    /// Extra category titles the orphan pass must not flag
    #[arg(long = "protect", value_name = "TITLE")]
    pub protect: Vec<String>,
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Actually delete
    #[arg(long)]
    pub confirm: bool,

    /// Only unreferenced categories
    #[arg(long)]
    pub categories: bool,

    /// Only unreferenced media
    #[arg(long)]
    pub media: bool,

    /// Only duplicate media
    #[arg(long)]
    pub duplicates: bool,

    /// Extra category titles to treat as protected
    #[arg(long = "protect", value_name = "TITLE")]
    pub protect: Vec<String>,
}

impl PruneArgs {
    /// No selector flag means everything.
    #[must_use]
    pub const fn selects_all(&self) -> bool {
        !(self.categories || self.media || self.duplicates)
    }
}

#[derive(Subcommand, Debug)]
pub enum CategoryCommands {
    /// Set or clear a category's parent
    Parent {
        /// Child category (id or slug)
        child: String,

        /// New parent (id or slug); omit to move to the root
        parent: Option<String>,
    },

    /// List categories with their parents
    List,
}

/// Shells supported by `completions`.
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
    Elvish,
}

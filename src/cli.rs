use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cmsync")]
#[command(about = "Module-aware sync between a local tree and a CMS repository", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Sync a whole module (every declared resource)
    cmsync sync modules/demo

    # Preview a sync without touching either side
    cmsync sync modules/demo --dry-run

    # Show how a selection is classified
    cmsync classify modules/demo modules/demo/src/main/vfs/system

    # Print the publish list for a selection as JSON
    cmsync publish modules/demo

    # List configured modules
    cmsync modules

    # Use an explicit configuration file
    cmsync --config ./cmsync.toml sync modules/demo")]
pub struct Cli {
    /// Configuration file (default: ./cmsync.toml, then the user config dir)
    #[arg(long, global = true, env = "CMSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output NDJSON events instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Classify the selected paths and reconcile them with the repository
    Sync {
        /// Local files or folders to sync
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Show what would be done without applying it
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Print the units the selected paths classify into
    Classify {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print the publish list of the selected paths as a JSON array
    Publish {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List registered modules
    Modules,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.quiet && self.verbose > 0 {
            anyhow::bail!("--quiet and --verbose cannot be used together");
        }
        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.quiet || self.json {
            return tracing::Level::ERROR;
        }

        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }

    /// Paths selected by the subcommand, empty for `modules`
    pub fn paths(&self) -> &[PathBuf] {
        match &self.command {
            Command::Sync { paths, .. } | Command::Classify { paths } | Command::Publish { paths } => {
                paths
            }
            Command::Modules => &[],
        }
    }
}

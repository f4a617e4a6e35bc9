use std::path::PathBuf;

use bili_ingest::SyncMode;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "bingest",
    version,
    about = "Ingest creator profiles and video catalogs from Bilibili",
    propagate_version = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to <config dir>/bingest/config.toml)
    #[arg(short, long, global = true, env = "BINGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Also write daily-rotated log files into this directory
    #[arg(long, global = true, env = "BINGEST_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Cookie string used when no pooled credential is configured
    #[arg(long, global = true, env = "BINGEST_COOKIES", hide_env_values = true)]
    pub cookies: Option<String>,

    /// Proxy URL for all requests
    #[arg(long, global = true, env = "BINGEST_PROXY")]
    pub proxy: Option<String>,

    /// Override the API host
    #[arg(long, global = true, env = "BINGEST_API_BASE")]
    pub api_base: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync the catalogs of a roster of creators
    Sync {
        /// Creator ids, optionally as `mid:name`. Defaults to the configured roster.
        #[arg(long = "creator", value_name = "MID[:NAME]")]
        creators: Vec<String>,

        /// Item cap per creator
        #[arg(long)]
        max_items: Option<usize>,

        #[arg(long, value_enum, default_value_t = ModeArg::Full)]
        mode: ModeArg,

        /// Append fetched items as JSON lines to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show a creator's profile and aggregate stats
    Profile { mid: u64 },

    /// List a creator's videos, newest first
    Videos {
        mid: u64,

        #[arg(long, default_value_t = 30)]
        max_items: usize,

        #[arg(long)]
        page_size: Option<u32>,
    },

    /// Show one video
    Video { bvid: String },

    /// Keyword search over videos
    Search {
        keyword: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },

    /// Top videos of a region
    Ranking {
        #[arg(long, default_value_t = 1)]
        region: u32,

        /// Ranking window in days (3 or 7)
        #[arg(long, default_value_t = 3)]
        days: u32,
    },

    /// Manage pooled credentials in the configuration file
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Show or initialise the configuration file
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,

        /// Write a default configuration file
        #[arg(long, conflicts_with = "show")]
        init: bool,

        /// Overwrite an existing file with --init
        #[arg(long, requires = "init")]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum CredentialAction {
    /// Pool status of every configured credential
    List,

    /// Add a credential
    Add {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: Option<String>,

        /// Cookie string, e.g. "SESSDATA=..; bili_jct=..; buvid3=.."
        #[arg(long, env = "BINGEST_NEW_COOKIES", hide_env_values = true)]
        cookies: String,
    },

    /// Remove a credential
    Remove { id: String },

    /// Put a credential back into rotation
    Enable { id: String },

    /// Take a credential out of rotation
    Disable { id: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Walk every page up to the item cap
    Full,
    /// Only the newest page
    Latest,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => SyncMode::Full,
            ModeArg::Latest => SyncMode::Latest,
        }
    }
}

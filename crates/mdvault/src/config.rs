use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Configuration for the mdvault command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "mdvault")]
#[command(about = "Browse, copy and version markdown files on local disk and WebDAV servers")]
pub struct Config {
    /// Directory holding version history buckets
    #[arg(long, env = "MDVAULT_HISTORY_DIR")]
    pub history_dir: Option<PathBuf>,

    /// JSON settings file
    #[arg(long, env = "MDVAULT_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// WebDAV server base URL
    #[arg(long, env = "WEBDAV_URL")]
    pub webdav_url: Option<String>,

    /// WebDAV username
    #[arg(long, env = "WEBDAV_USER")]
    pub webdav_user: Option<String>,

    /// WebDAV password
    #[arg(long, env = "WEBDAV_PASSWORD", hide_env_values = true)]
    pub webdav_password: Option<String>,

    /// Polling interval for remote watches (seconds)
    #[arg(long, default_value = "30", env = "WEBDAV_POLL_INTERVAL")]
    pub poll_interval_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List a directory
    Ls {
        path: String,
        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },
    /// Print a file
    Cat { path: String },
    /// Copy a file or directory, across storage if needed
    Cp { source: String, target: String },
    /// Move a file or directory, across storage if needed
    Mv { source: String, target: String },
    /// Record the current content of a file in its history
    Snapshot {
        path: String,
        #[arg(short, long)]
        message: Option<String>,
    },
    /// List recorded versions of a file
    History { path: String },
    /// Print one recorded version
    Show { path: String, id: String },
    /// Delete one recorded version
    Forget { path: String, id: String },
    /// Print a line whenever a file or directory changes
    Watch { path: String },
    /// Open a file or directory and print its tree
    Open { path: String },
    /// List recently opened files, pinned first
    Recent {
        /// Pin or unpin this path instead of listing
        #[arg(long, conflicts_with = "clear")]
        pin: Option<String>,
        /// Forget every entry
        #[arg(long)]
        clear: bool,
    },
}

impl Config {
    /// History directory, defaulting to `<data dir>/mdvault/history`.
    pub fn history_root(&self) -> PathBuf {
        self.history_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("mdvault")
                .join("history")
        })
    }
}

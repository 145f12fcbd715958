use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Content-addressed bundle storage.
#[derive(Debug, Parser)]
#[command(name = "cairn", version, about)]
pub struct Cli {
    /// Path to a TOML config file (default: ./cairn.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store root directory (overrides the config file).
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Pack a directory tree under a named ref.
    Pack {
        /// Source directory.
        dir: PathBuf,
        /// Ref name to publish the tree under (e.g. "builds/latest").
        #[arg(long)]
        name: String,
    },

    /// Extract a named ref into a directory.
    Extract {
        /// Ref name to resolve.
        name: String,
        /// Target directory (created if absent).
        dir: PathBuf,
        /// Accept a ref value cached up to this many seconds ago.
        #[arg(long)]
        cache_time: Option<u64>,
    },

    /// Dump a bundle's header tables with offsets and compression ratios.
    Dump {
        /// Bundle locator.
        locator: String,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// List refs, optionally under a prefix.
    Refs {
        /// Name prefix filter.
        #[arg(default_value = "")]
        prefix: String,
    },
}

//! CLI command definitions
//!
//! All CLI structs and subcommand enums are defined here.

use crate::graph::Uid;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// followgraph - follow lists and common-followings graphs
#[derive(Parser, Debug)]
#[command(name = "followgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.config/followgraph/config.yaml)
    #[arg(short, long, global = true, env = "FOLLOWGRAPH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show which account the session belongs to
    Whoami {
        /// Ask the identity endpoint even if a uid is configured
        #[arg(long)]
        remote: bool,
    },

    /// List one page of accounts a user follows
    Followings(ListArgs),

    /// List one page of a user's fans
    Fans {
        #[command(flatten)]
        list: ListArgs,

        /// Continuation token printed with the previous page
        #[arg(long)]
        offset: Option<String>,
    },

    /// Show accounts both you and another user follow
    Common {
        /// The other user's uid
        uid: Uid,

        /// Skip the cache read (the result is still cached)
        #[arg(long)]
        no_cache: bool,
    },

    /// Build the common-followings graph of everyone you follow
    Graph {
        /// Write the dataset JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Drop users without any link before writing
        #[arg(long)]
        prune: bool,

        /// Look up N users at a time instead of one by one
        #[arg(long, value_name = "N")]
        batched: Option<usize>,

        /// Skip cache reads for lookups
        #[arg(long)]
        no_cache: bool,

        /// Print Prometheus metrics to stderr when done
        #[arg(long)]
        metrics: bool,
    },

    /// Copy legacy cache entries into the SQLite cache
    Migrate {
        /// Run even if a migration already completed
        #[arg(long)]
        force: bool,

        /// Forget that a migration completed, then exit
        #[arg(long)]
        reset: bool,
    },

    /// Inspect or clear the cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Paging options shared by the list commands
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// User to list (default: yourself)
    #[arg(short, long)]
    pub uid: Option<Uid>,

    /// Page number, starting at 1
    #[arg(short, long, default_value_t = 1)]
    pub page: u32,

    /// Items per page (max 50)
    #[arg(long, default_value_t = 50)]
    pub page_size: u32,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show entry counts per store
    Stats,

    /// Remove every cached entry
    Clear,

    /// Delete expired entries from the SQLite cache
    Purge,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Check the configuration for errors
    Validate,
}

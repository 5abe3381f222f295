use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about = "Bridge relay validator consensus")]
pub(crate) struct Opts {
    /// Consensus parameters as JSON, missing fields take their defaults
    #[arg(long, env = "LBFT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Keep the databases here instead of in memory
    #[arg(long, env = "LBFT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Print the effective consensus configuration
    Config,
    /// Run a set of validators in this process
    Devnet {
        #[arg(long, default_value = "4")]
        validators: usize,

        /// Stop after this many new blocks
        #[arg(long, default_value = "10")]
        blocks: u64,
    },
}

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Инспекция кэша снапшотов голосования (без доступа к цепи)
#[derive(Parser, Debug)]
#[command(
    name = "votecache",
    version,
    about = "Voting power snapshot cache inspector",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub common: Common,

    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Overrides on top of VC_* environment variables.
#[derive(Args, Debug)]
pub struct Common {
    /// Voting cache directory (env VC_VOTING_DIR)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,
    /// Network the cache serves (env VC_NETWORK)
    #[arg(long, global = true)]
    pub network: Option<String>,
    /// Pollard depth per round (env VC_DEPTH_PER_ROUND)
    #[arg(long, global = true)]
    pub depth_per_round: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// List checksum index entries in file order
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Verify every indexed file (checksum, decode, network, version)
    ///
    /// Пример:
    ///   votecache doctor --dir ./voting --network mainnet
    ///   votecache doctor --dir ./voting --trees --json
    Doctor {
        /// Check the derived network tree cache instead of snapshots
        #[arg(long, default_value_t = false)]
        trees: bool,
        /// Check the node tree cache instead of snapshots
        #[arg(long, default_value_t = false, conflicts_with = "trees")]
        node_trees: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load a cached snapshot and print a summary
    Show {
        #[arg(long)]
        block: u32,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Build proposal artifacts (pollard + base64) from a cached snapshot,
    /// or decode an encoded pollard with --decode
    Pollard {
        #[arg(long, required_unless_present = "decode")]
        block: Option<u32>,
        /// base64(zstd(JSON)) pollard to decode
        #[arg(long, conflicts_with = "block")]
        decode: Option<String>,
    },
    /// Print the cached network tree root and proposal pollard; with --challenge,
    /// the challenge-response pollard for that node index. --node reads the
    /// cached tree of that node instead
    Tree {
        #[arg(long)]
        block: u32,
        #[arg(long)]
        node: Option<u64>,
        #[arg(long)]
        challenge: Option<u64>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

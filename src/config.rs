//! Centralized configuration and builder for the voting cache.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - CacheConfig::from_env() reads the VC_* variables; CLI flags override on top.
//! - CacheConfigBuilder mirrors the fluent setters for callers that start from a clean default.
//!
//! Env:
//! - VC_VOTING_DIR        - root of the voting cache (snapshots + checksums.sha384)
//! - VC_NETWORK           - chain identifier the cache serves (mainnet, holesky, ...)
//! - VC_ZSTD_LEVEL        - zstd level for stored artifacts (default 19)
//! - VC_DEPTH_PER_ROUND   - pollard depth per challenge round (default 5)

use std::fmt;
use std::path::{Path, PathBuf};

/// Default zstd level: ratio over speed (artifacts are written rarely, read often).
pub const DEFAULT_ZSTD_LEVEL: i32 = 19;

/// Depth of a pollard row below its root node.
pub const DEFAULT_DEPTH_PER_ROUND: u64 = 5;

/// Index file name inside every artifact directory.
pub const CHECKSUM_TABLE_FILENAME: &str = "checksums.sha384";

/// Subdirectory of the voting dir holding derived network trees.
pub const NETWORK_TREE_FOLDER: &str = "network-trees";

/// Subdirectory of the voting dir holding per-node voting trees.
pub const NODE_TREE_FOLDER: &str = "node-trees";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Root directory for snapshots and their checksum index.
    /// Env: VC_VOTING_DIR (default "./voting")
    pub voting_dir: PathBuf,

    /// Network the cache serves; artifacts for other networks are never returned.
    /// Env: VC_NETWORK (default "mainnet")
    pub network: String,

    /// zstd compression level for stored artifacts and encoded pollards.
    /// Env: VC_ZSTD_LEVEL (default 19)
    pub zstd_level: i32,

    /// Pollard depth per round (tree levels between a pollard's root and its row).
    /// Env: VC_DEPTH_PER_ROUND (default 5)
    pub depth_per_round: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            voting_dir: PathBuf::from("voting"),
            network: "mainnet".to_string(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            depth_per_round: DEFAULT_DEPTH_PER_ROUND,
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables; unparsable values keep the default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("VC_VOTING_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.voting_dir = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("VC_NETWORK") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.network = s.to_string();
            }
        }

        if let Ok(v) = std::env::var("VC_ZSTD_LEVEL") {
            if let Ok(n) = v.trim().parse::<i32>() {
                cfg.zstd_level = n;
            }
        }

        if let Ok(v) = std::env::var("VC_DEPTH_PER_ROUND") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    cfg.depth_per_round = n;
                }
            }
        }

        cfg
    }

    /// Fluent setters (builder-style) to override specific fields.

    pub fn with_voting_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.voting_dir = dir.into();
        self
    }

    pub fn with_network<S: Into<String>>(mut self, network: S) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    pub fn with_depth_per_round(mut self, depth: u64) -> Self {
        self.depth_per_round = depth;
        self
    }

    /// Directory of the snapshot store (the voting dir itself).
    pub fn snapshot_dir(&self) -> &Path {
        &self.voting_dir
    }

    /// Directory of the derived network tree cache.
    pub fn tree_dir(&self) -> PathBuf {
        self.voting_dir.join(NETWORK_TREE_FOLDER)
    }

    /// Directory of the per-node tree cache.
    pub fn node_tree_dir(&self) -> PathBuf {
        self.voting_dir.join(NODE_TREE_FOLDER)
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> Self {
        self
    }
}

impl fmt::Display for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheConfig {{ \
             voting_dir: {}, \
             network: {}, \
             zstd_level: {}, \
             depth_per_round: {} \
             }}",
            self.voting_dir.display(),
            self.network,
            self.zstd_level,
            self.depth_per_round,
        )
    }
}

/// Lightweight builder that produces a CacheConfig.
#[derive(Clone, Debug)]
pub struct CacheConfigBuilder {
    cfg: CacheConfig,
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: CacheConfig::from_env(),
        }
    }
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: CacheConfig::default(),
        }
    }

    pub fn voting_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cfg.voting_dir = dir.into();
        self
    }

    pub fn network<S: Into<String>>(mut self, network: S) -> Self {
        self.cfg.network = network.into();
        self
    }

    pub fn zstd_level(mut self, level: i32) -> Self {
        self.cfg.zstd_level = level;
        self
    }

    pub fn depth_per_round(mut self, depth: u64) -> Self {
        self.cfg.depth_per_round = depth;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.cfg
    }
}

//! store - артефакты на диске, проверяемые по индексу контрольных сумм.
//!
//! Layout of one store directory:
//!   <dir>/checksums.sha384          - index, "<sha384-hex>  <filename>" per line
//!   <dir>/<network>-<block>.json.zst - zstd(JSON(artifact))
//!
//! Save: JSON → zstd → SHA-384 over the *compressed* bytes → write file (tmp+rename)
//! → index: parse, sort by block, upsert, write (tmp+rename).
//!
//! Load: index lookup → hex → read → SHA-384 compare → zstd → JSON → network → version floor.
//! Only a damaged index is a hard error; every other failure is a soft miss (MissReason).
//!
//! Entry resolution for a key: among index lines for that key, the line whose
//! filename is this store's own filename for the key wins; otherwise the last such
//! line in file order wins (last write wins).
//!
//! Three stores share this code: voting info snapshots and network trees are keyed by
//! block (`<network>-<block>.json.zst`), node trees by (block, node index) with
//! their own filename layout (see `index::FilenameScheme`).
//!
//! Single writer per directory; `&mut self` because the zstd contexts are owned.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha384};
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::Compressor;
use crate::config::{CacheConfig, CHECKSUM_TABLE_FILENAME};
use crate::error::CacheError;
use crate::index::{ChecksumEntry, ChecksumIndex, FilenameScheme, ARTIFACT_SUFFIX};
use crate::metrics::CacheMetrics;
use crate::tree::{NetworkVotingTree, NodeVotingTree};
use crate::types::VotingPowerSnapshot;
use crate::util::write_atomic;
use crate::version::VersionFloor;

mod verify;

pub use verify::{EntryStatus, VerifyEntry, VerifyReport};

/// Length of a SHA-384 digest in bytes.
pub const CHECKSUM_LEN: usize = 48;

/// Something the store can persist: JSON-serializable, looked up by `Key`.
pub trait CachedArtifact: Serialize + DeserializeOwned {
    /// Human-readable kind used in log lines.
    const KIND: &'static str;
    /// How filenames in this kind's directory encode their key.
    const SCHEME: FilenameScheme = FilenameScheme::Block;

    type Key: Copy + PartialEq + fmt::Display;

    fn key(&self) -> Self::Key;
    fn network(&self) -> &str;
    fn block_number(&self) -> u32;
    fn generator_version(&self) -> &str;

    fn filename(&self) -> String {
        artifact_filename(self.network(), self.block_number())
    }

    /// Does an index entry belong to `key`?
    fn entry_matches(entry: &ChecksumEntry, key: Self::Key) -> bool;

    /// Filename this store writes for `key`, when it can be known without the artifact.
    fn own_filename(network: &str, key: Self::Key) -> Option<String>;
}

/// `<network>-<block>.json.zst`
pub fn artifact_filename(network: &str, block_number: u32) -> String {
    format!("{}-{}{}", network, block_number, ARTIFACT_SUFFIX)
}

pub fn sha384(bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&Sha384::digest(bytes));
    out
}

/// Index entry check for block-keyed artifacts.
pub fn block_entry_matches(entry: &ChecksumEntry, block_number: u32) -> bool {
    entry.block_number == block_number as u64
}

impl CachedArtifact for VotingPowerSnapshot {
    const KIND: &'static str = "voting info snapshot";
    type Key = u32;

    fn key(&self) -> u32 {
        self.block_number
    }

    fn network(&self) -> &str {
        &self.network
    }
    fn block_number(&self) -> u32 {
        self.block_number
    }
    fn generator_version(&self) -> &str {
        &self.generator_version
    }
    fn entry_matches(entry: &ChecksumEntry, key: u32) -> bool {
        block_entry_matches(entry, key)
    }
    fn own_filename(network: &str, key: u32) -> Option<String> {
        Some(artifact_filename(network, key))
    }
}

/// Why a lookup did not produce an artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MissReason {
    /// No index file yet (cold cache).
    NoIndex,
    /// Index has no entry for the block.
    NotIndexed,
    /// Indexed file is missing or unreadable.
    FileUnreadable,
    /// Stored checksum does not match the file bytes.
    ChecksumMismatch,
    /// Decompression or JSON decoding failed.
    Undecodable,
    /// File content is for another key (block / node) than the index claims.
    KeyMismatch { found: String },
    NetworkMismatch { found: String },
    /// Version string is not semver.
    BadVersion { found: String },
    /// Made by a generator below the compatibility floor.
    VersionTooOld { found: String },
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::NoIndex => write!(f, "checksum table not found"),
            MissReason::NotIndexed => write!(f, "no index entry for block"),
            MissReason::FileUnreadable => write!(f, "file missing or unreadable"),
            MissReason::ChecksumMismatch => write!(f, "checksum mismatch"),
            MissReason::Undecodable => write!(f, "could not decompress/deserialize"),
            MissReason::KeyMismatch { found } => write!(f, "content is for {}", found),
            MissReason::NetworkMismatch { found } => write!(f, "made for network {}", found),
            MissReason::BadVersion { found } => write!(f, "unparsable version {}", found),
            MissReason::VersionTooOld { found } => write!(f, "made by incompatible v{}", found),
        }
    }
}

/// Result of a store lookup.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit { artifact: T, filename: String },
    Miss(MissReason),
}

impl<T> Lookup<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Hit { artifact, .. } => Some(artifact),
            Lookup::Miss(_) => None,
        }
    }

    pub fn miss_reason(&self) -> Option<&MissReason> {
        match self {
            Lookup::Hit { .. } => None,
            Lookup::Miss(r) => Some(r),
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }
}

/// Checksum-indexed, zstd-compressed store of one artifact kind.
pub struct ArtifactStore<T: CachedArtifact> {
    dir: PathBuf,
    index: ChecksumIndex,
    network: String,
    floor: VersionFloor,
    codec: Compressor,
    metrics: Arc<CacheMetrics>,
    _kind: PhantomData<fn() -> T>,
}

pub type SnapshotStore = ArtifactStore<VotingPowerSnapshot>;
pub type TreeStore = ArtifactStore<NetworkVotingTree>;
pub type NodeTreeStore = ArtifactStore<NodeVotingTree>;

impl<T: CachedArtifact> ArtifactStore<T> {
    /// Open (creating the directory if needed) a store serving `network`.
    pub fn open(dir: &Path, network: &str, zstd_level: i32) -> Result<Self> {
        Self::open_with(
            dir,
            network,
            zstd_level,
            VersionFloor::default_floor()?,
            Arc::new(CacheMetrics::new()),
        )
    }

    /// Full constructor: explicit compatibility floor and shared metrics.
    pub fn open_with(
        dir: &Path,
        network: &str,
        zstd_level: i32,
        floor: VersionFloor,
        metrics: Arc<CacheMetrics>,
    ) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let codec = Compressor::new(zstd_level)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            index: ChecksumIndex::new(dir.join(CHECKSUM_TABLE_FILENAME)),
            network: network.to_string(),
            floor,
            codec,
            metrics,
            _kind: PhantomData,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn index(&self) -> &ChecksumIndex {
        &self.index
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Shared codec (also used to encode pollards for transport).
    pub fn codec_mut(&mut self) -> &mut Compressor {
        &mut self.codec
    }

    /// Persist `artifact` and record its checksum in the index.
    ///
    /// Serialization/compression failures are returned before anything touches disk.
    /// A failure after the file write leaves an unindexed file, which loads ignore.
    pub fn save(&mut self, artifact: &T) -> Result<ChecksumEntry> {
        let json = serde_json::to_vec(artifact).map_err(|e| CacheError::Serialization {
            what: T::KIND,
            source: e,
        })?;
        let compressed = self
            .codec
            .encode(&json)
            .with_context(|| format!("compress {}", T::KIND))?;
        let checksum_hex = hex::encode(sha384(&compressed));

        let filename = artifact.filename();
        let full = self.dir.join(&filename);
        write_atomic(&full, &compressed)
            .with_context(|| format!("write file [{}]", full.display()))?;

        let entry = ChecksumEntry::with_scheme(checksum_hex, filename.clone(), T::SCHEME)?;
        let mut lines = self
            .index
            .parse()
            .context("parse checksum table")?
            .unwrap_or_default();
        ChecksumIndex::sort_with(&mut lines, T::SCHEME).context("sort checksum table entries")?;
        ChecksumIndex::upsert(&mut lines, &entry);
        self.index.write(&lines)?;

        self.metrics.record_save(compressed.len() as u64);
        info!(
            "saved {} [{}] {} bytes={} (json {})",
            T::KIND,
            filename,
            artifact.key(),
            compressed.len(),
            json.len()
        );
        Ok(entry)
    }

    /// Load the artifact for `key`; Ok(None) on any soft miss.
    pub fn load(&mut self, key: T::Key) -> Result<Option<T>> {
        Ok(self.lookup(key)?.into_option())
    }

    /// Like `load`, but reports why a miss happened.
    pub fn lookup(&mut self, key: T::Key) -> Result<Lookup<T>> {
        let res = self.lookup_inner(key);
        match &res {
            Ok(Lookup::Hit { filename, .. }) => {
                self.metrics.record_hit();
                info!("loaded {} [{}] {}", T::KIND, filename, key);
            }
            Ok(Lookup::Miss(reason)) => {
                self.metrics.record_miss();
                match reason {
                    MissReason::ChecksumMismatch
                    | MissReason::FileUnreadable
                    | MissReason::Undecodable => self.metrics.record_integrity_failure(),
                    MissReason::NetworkMismatch { .. }
                    | MissReason::BadVersion { .. }
                    | MissReason::VersionTooOld { .. }
                    | MissReason::KeyMismatch { .. } => self.metrics.record_compat_rejection(),
                    MissReason::NoIndex | MissReason::NotIndexed => {}
                }
            }
            Err(_) => self.metrics.record_miss(),
        }
        res
    }

    fn lookup_inner(&mut self, key: T::Key) -> Result<Lookup<T>> {
        let lines = match self.index.parse().context("parse checksum table")? {
            Some(l) => l,
            None => {
                info!(
                    "checksum table {} not found, no saved {} can be loaded",
                    self.index.path().display(),
                    T::KIND
                );
                return Ok(Lookup::Miss(MissReason::NoIndex));
            }
        };

        let entries = ChecksumIndex::parse_all_with(&lines, T::SCHEME)?;
        let own = T::own_filename(&self.network, key);
        let entry = match resolve_entry::<T>(&entries, key, own.as_deref()) {
            Some(e) => e,
            None => {
                debug!("{} for {} is not indexed", T::KIND, key);
                return Ok(Lookup::Miss(MissReason::NotIndexed));
            }
        };
        let filename = entry.filename.clone();

        let expected = hex::decode(&entry.checksum_hex).map_err(|e| {
            CacheError::index_corruption(
                &entry.to_line(),
                format!("checksum ({}) could not be parsed: {}", entry.checksum_hex, e),
            )
        })?;

        let full = self.dir.join(&filename);
        let compressed = match fs::read(&full) {
            Ok(b) => b,
            Err(e) => {
                warn!("error reading {} [{}]: {}; it must be regenerated", T::KIND, full.display(), e);
                return Ok(Lookup::Miss(MissReason::FileUnreadable));
            }
        };

        let actual = sha384(&compressed);
        if expected.as_slice() != actual.as_slice() {
            warn!(
                "checksum mismatch for [{}] (expected {}, but it was {}); it must be regenerated",
                filename,
                entry.checksum_hex,
                hex::encode(actual)
            );
            return Ok(Lookup::Miss(MissReason::ChecksumMismatch));
        }

        let artifact: T = match self
            .codec
            .decode(&compressed)
            .and_then(|json| serde_json::from_slice(&json).map_err(anyhow::Error::from))
        {
            Ok(a) => a,
            Err(e) => {
                warn!("error decoding {} [{}]: {:#}; it must be regenerated", T::KIND, filename, e);
                return Ok(Lookup::Miss(MissReason::Undecodable));
            }
        };

        if artifact.key() != key {
            warn!(
                "[{}] holds {} instead of {} so it cannot be used",
                filename,
                artifact.key(),
                key
            );
            return Ok(Lookup::Miss(MissReason::KeyMismatch {
                found: artifact.key().to_string(),
            }));
        }

        if artifact.network() != self.network {
            warn!(
                "{} [{}] is for network {} instead of {} so it cannot be used",
                T::KIND,
                filename,
                artifact.network(),
                self.network
            );
            return Ok(Lookup::Miss(MissReason::NetworkMismatch {
                found: artifact.network().to_string(),
            }));
        }

        let version = artifact.generator_version().to_string();
        match self.floor.accepts(&version) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "{} [{}] was made with v{} which is not compatible (lowest compatible = v{}) so it cannot be used",
                    T::KIND,
                    filename,
                    version,
                    self.floor.floor()
                );
                return Ok(Lookup::Miss(MissReason::VersionTooOld { found: version }));
            }
            Err(e) => {
                warn!("{} [{}]: {:#}; it cannot be used", T::KIND, filename, e);
                return Ok(Lookup::Miss(MissReason::BadVersion { found: version }));
            }
        }

        Ok(Lookup::Hit { artifact, filename })
    }

    /// Parsed index in file order (empty when the index does not exist).
    pub fn entries(&self) -> Result<Vec<ChecksumEntry>> {
        match self.index.parse()? {
            Some(lines) => ChecksumIndex::parse_all_with(&lines, T::SCHEME),
            None => Ok(Vec::new()),
        }
    }

    /// Check every indexed file against its checksum and decode it.
    pub fn verify_all(&mut self) -> Result<VerifyReport> {
        let lines = self.index.parse()?.unwrap_or_default();
        let mut report = VerifyReport::default();
        for line in &lines {
            match ChecksumIndex::parse_entry_with(line, T::SCHEME) {
                Ok(entry) => {
                    let status = self.verify_entry(&entry);
                    report.push(VerifyEntry {
                        filename: entry.filename,
                        block_number: Some(entry.block_number),
                        node_index: entry.node_index,
                        status,
                    });
                }
                Err(e) => {
                    debug!("malformed index line ({}): {:#}", line, e);
                    report.push(VerifyEntry {
                        filename: line.clone(),
                        block_number: None,
                        node_index: None,
                        status: EntryStatus::MalformedLine,
                    });
                }
            }
        }
        Ok(report)
    }

    fn verify_entry(&mut self, entry: &ChecksumEntry) -> EntryStatus {
        let expected = match hex::decode(&entry.checksum_hex) {
            Ok(b) => b,
            Err(_) => return EntryStatus::MalformedLine,
        };
        let bytes = match fs::read(self.dir.join(&entry.filename)) {
            Ok(b) => b,
            Err(_) => return EntryStatus::Missing,
        };
        if sha384(&bytes).as_slice() != expected.as_slice() {
            return EntryStatus::ChecksumMismatch;
        }
        let decoded: Result<T> = self
            .codec
            .decode(&bytes)
            .and_then(|json| serde_json::from_slice(&json).map_err(anyhow::Error::from));
        match decoded {
            Ok(a) if a.network() != self.network => EntryStatus::OtherNetwork,
            Ok(a) => match self.floor.accepts(a.generator_version()) {
                Ok(true) => EntryStatus::Ok,
                _ => EntryStatus::Incompatible,
            },
            Err(_) => EntryStatus::Undecodable,
        }
    }
}

/// Snapshot store for the configured voting dir.
pub fn open_snapshot_store(cfg: &CacheConfig, metrics: Arc<CacheMetrics>) -> Result<SnapshotStore> {
    SnapshotStore::open_with(
        cfg.snapshot_dir(),
        &cfg.network,
        cfg.zstd_level,
        VersionFloor::default_floor()?,
        metrics,
    )
}

/// Derived network tree store under `<voting_dir>/network-trees`.
pub fn open_tree_store(cfg: &CacheConfig, metrics: Arc<CacheMetrics>) -> Result<TreeStore> {
    TreeStore::open_with(
        &cfg.tree_dir(),
        &cfg.network,
        cfg.zstd_level,
        VersionFloor::default_floor()?,
        metrics,
    )
}

/// Node tree store under `<voting_dir>/node-trees`.
pub fn open_node_tree_store(cfg: &CacheConfig, metrics: Arc<CacheMetrics>) -> Result<NodeTreeStore> {
    NodeTreeStore::open_with(
        &cfg.node_tree_dir(),
        &cfg.network,
        cfg.zstd_level,
        VersionFloor::default_floor()?,
        metrics,
    )
}

/// Own filename for the key wins; otherwise the last line for the key.
fn resolve_entry<'a, T: CachedArtifact>(
    entries: &'a [ChecksumEntry],
    key: T::Key,
    own_filename: Option<&str>,
) -> Option<&'a ChecksumEntry> {
    let mut fallback = None;
    let mut own = None;
    for e in entries.iter().filter(|e| T::entry_matches(e, key)) {
        if Some(e.filename.as_str()) == own_filename {
            own = Some(e);
        }
        fallback = Some(e);
    }
    own.or(fallback)
}

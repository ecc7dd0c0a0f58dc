// Базовые модули
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;
pub mod version;

// Хранилище: индекс контрольных сумм, zstd-кодек, артефакты на диске
pub mod codec;
pub mod index;
pub mod store;

// Дерево голосов (pollard, Merkle proofs) и cache-aside оркестратор
pub mod orchestrator;
pub mod tree;

// Утилиты (hex/decimal serde helpers, tmp+rename)
pub mod util;

// Удобные реэкспорты
pub use codec::Compressor;
pub use config::{CacheConfig, CacheConfigBuilder};
pub use error::CacheError;
pub use index::{ChecksumEntry, ChecksumIndex, FilenameScheme};
pub use orchestrator::{
    FinalizedBlockProvider, ProposalArtifacts, ProposalTreeManager, VotingArtifacts,
    VotingInfoSource,
};
pub use store::{ArtifactStore, Lookup, MissReason, NodeTreeStore, SnapshotStore, TreeStore};
pub use tree::{
    ChallengeArtifacts, NetworkVotingTree, NodeTreeKey, NodeVotingTree, PollardBuilder,
    TreeHashPollardBuilder, VotingTree,
};
pub use types::{Address, NodeVotingInfo, VotingPowerSnapshot, VotingTreeNode};

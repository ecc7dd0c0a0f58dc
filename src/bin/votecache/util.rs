use votecache::CacheConfig;
use votecache::VotingTreeNode;

use super::cli::Common;

/// Env first (VC_*), then explicit CLI flags.
pub fn resolve_config(common: &Common) -> CacheConfig {
    let mut cfg = CacheConfig::from_env();
    if let Some(dir) = &common.dir {
        cfg = cfg.with_voting_dir(dir.clone());
    }
    if let Some(net) = &common.network {
        cfg = cfg.with_network(net.clone());
    }
    if let Some(d) = common.depth_per_round {
        cfg = cfg.with_depth_per_round(d);
    }
    cfg
}

pub fn short_hash(node: &VotingTreeNode) -> String {
    let h = hex::encode(node.hash);
    format!("0x{}…{}", &h[..8], &h[h.len() - 8..])
}

/// First 16 characters of a checksum as read from the index. The index is
/// hand-editable, so the value is not guaranteed to be ASCII hex.
pub fn checksum_prefix(checksum: &str) -> &str {
    match checksum.char_indices().nth(16) {
        Some((end, _)) => &checksum[..end],
        None => checksum,
    }
}

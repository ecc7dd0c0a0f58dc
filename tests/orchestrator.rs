use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

use votecache::orchestrator::{decode_pollard, encode_pollard};
use votecache::tree::{leaf_for_balance, root_from_proof};
use votecache::{
    Address, CacheConfig, CacheError, Compressor, FinalizedBlockProvider, NodeVotingInfo,
    ProposalTreeManager, TreeHashPollardBuilder, VotingInfoSource,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("vctest-orch-{prefix}-{pid}-{t}-{id}"))
}

/// Детерминированный "источник цепи" со счётчиком вызовов.
#[derive(Clone)]
struct FakeChain {
    calls: Arc<AtomicUsize>,
    fail: bool,
}

impl FakeChain {
    fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl VotingInfoSource for FakeChain {
    fn voting_info(&self, block_number: u32) -> Result<Vec<NodeVotingInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("rpc unavailable"));
        }
        let seed = (block_number % 251) as u8;
        Ok((1..=7u8)
            .map(|i| NodeVotingInfo {
                node_address: Address([i; 20]),
                voting_power: (seed as u128 + 1) * 10u128.pow(18) * i as u128,
                delegate: Address([if i > 4 { 2 } else { i }; 20]),
            })
            .collect())
    }
}

struct Finalized(u32);

impl FinalizedBlockProvider for Finalized {
    fn latest_finalized_block(&self) -> Result<u32> {
        Ok(self.0)
    }
}

fn manager(
    root: &Path,
    chain: &FakeChain,
) -> Result<ProposalTreeManager<FakeChain, TreeHashPollardBuilder, Finalized>> {
    let cfg = CacheConfig::default()
        .with_voting_dir(root)
        .with_network("mainnet")
        .with_zstd_level(3)
        .with_depth_per_round(2);
    ProposalTreeManager::new(cfg, chain.clone(), TreeHashPollardBuilder::new(2), Finalized(2048))
}

#[test]
fn second_request_is_served_from_cache() -> Result<()> {
    let root = unique_root("scenario");
    let chain = FakeChain::new();

    let (tree1, artifacts1) = {
        let mut m = manager(&root, &chain)?;
        let tree = m.get_network_tree(Some(1000))?;
        let snap = m.get_snapshot(Some(1000))?;
        let artifacts = m.create_artifacts_for_proposal(&snap)?;
        (tree, artifacts)
    };
    assert_eq!(chain.calls(), 1);
    assert!(root.join("mainnet-1000.json.zst").exists());
    assert!(root.join("network-trees").join("mainnet-1000.json.zst").exists());

    // Новый процесс: та же директория, ни одного обращения к цепи
    let mut m = manager(&root, &chain)?;
    let tree2 = m.get_network_tree(Some(1000))?;
    let snap = m.get_snapshot(Some(1000))?;
    let artifacts2 = m.create_artifacts_for_proposal(&snap)?;
    assert_eq!(chain.calls(), 1);

    assert_eq!(tree1, tree2);
    assert_eq!(artifacts1, artifacts2);
    assert_eq!(artifacts2.block_number, 1000);

    let metrics = m.metrics();
    assert_eq!(metrics.tree_cache_hits, 1);
    assert_eq!(metrics.snapshot_cache_hits, 1);
    assert_eq!(metrics.cold_generations, 0);
    Ok(())
}

#[test]
fn snapshot_cache_rebuilds_missing_tree_without_chain() -> Result<()> {
    let root = unique_root("rebuild");
    let chain = FakeChain::new();
    let first = manager(&root, &chain)?.get_network_tree(Some(77))?;

    fs::remove_dir_all(root.join("network-trees"))?;
    let mut m = manager(&root, &chain)?;
    let again = m.get_network_tree(Some(77))?;
    assert_eq!(first, again);
    assert_eq!(chain.calls(), 1);
    assert_eq!(m.metrics().snapshot_cache_hits, 1);
    assert!(root.join("network-trees").join("mainnet-77.json.zst").exists());
    Ok(())
}

#[test]
fn finalized_block_is_used_when_none_given() -> Result<()> {
    let root = unique_root("finalized");
    let chain = FakeChain::new();
    let mut m = manager(&root, &chain)?;
    let tree = m.get_network_tree(None)?;
    assert_eq!(tree.block_number, 2048);
    assert!(root.join("mainnet-2048.json.zst").exists());
    Ok(())
}

#[test]
fn chain_failure_reaches_caller() -> Result<()> {
    let root = unique_root("chainfail");
    let chain = FakeChain::failing();
    let mut m = manager(&root, &chain)?;

    let err = m.get_network_tree(Some(5)).unwrap_err();
    assert!(CacheError::is_chain_query(&err), "{:#}", err);
    assert!(format!("{:#}", err).contains("block 5"));
    assert!(!root.join("mainnet-5.json.zst").exists());
    assert!(!root.join("checksums.sha384").exists());
    Ok(())
}

#[test]
fn corrupted_indexes_degrade_to_cold_generation() -> Result<()> {
    let root = unique_root("degrade");
    let chain = FakeChain::new();
    let original = manager(&root, &chain)?.get_network_tree(Some(9))?;

    fs::write(root.join("checksums.sha384"), "this is not an index\n")?;
    fs::write(root.join("network-trees").join("checksums.sha384"), "neither is this\n")?;

    let mut m = manager(&root, &chain)?;
    let tree = m.get_network_tree(Some(9))?;
    assert_eq!(tree, original);
    assert_eq!(chain.calls(), 2);
    // Два деградировавших шага чтения и два неудачных сохранения
    assert_eq!(m.metrics().degraded_steps, 4);
    Ok(())
}

#[test]
fn save_failure_still_returns_result() -> Result<()> {
    let root = unique_root("savefail");
    fs::create_dir_all(&root)?;
    // Индекс снапшотов - директория: ни прочитать, ни переписать нельзя
    fs::create_dir_all(root.join("checksums.sha384"))?;

    let chain = FakeChain::new();
    let mut m = manager(&root, &chain)?;
    let snap = m.get_snapshot(Some(314))?;
    assert_eq!(snap.block_number, 314);
    assert_eq!(snap.voting_info.len(), 7);
    assert_eq!(chain.calls(), 1);
    Ok(())
}

#[test]
fn encoded_pollard_roundtrips() -> Result<()> {
    let root = unique_root("encode");
    let chain = FakeChain::new();
    let mut m = manager(&root, &chain)?;
    let snap = m.get_snapshot(Some(12))?;
    let artifacts = m.create_artifacts_for_proposal(&snap)?;

    // 7 узлов -> 8x8 листьев, строка на глубине 2
    assert_eq!(artifacts.pollard.len(), 4);
    assert_eq!(
        artifacts.pollard.iter().map(|n| n.sum).sum::<u128>(),
        snap.total_voting_power()
    );

    let mut codec = Compressor::new(19)?;
    assert_eq!(decode_pollard(&mut codec, &artifacts.encoded_pollard)?, artifacts.pollard);
    // Кодирование детерминировано при одинаковом уровне
    let mut same = Compressor::new(3)?;
    assert_eq!(encode_pollard(&mut same, &artifacts.pollard)?, artifacts.encoded_pollard);
    Ok(())
}

/// Мощность узла i в FakeChain для блока: (block % 251 + 1) * 1e18 * i
fn unit(block: u32) -> u128 {
    (block % 251 + 1) as u128 * 10u128.pow(18)
}

#[test]
fn node_tree_is_cached_next_to_network_tree() -> Result<()> {
    let root = unique_root("nodetree");
    let chain = FakeChain::new();
    let first = manager(&root, &chain)?.get_node_tree(Some(1000), 1)?;

    // узлу 2 делегируют 5, 6 и 7
    assert_eq!(first.address, Address([2; 20]));
    assert_eq!(first.delegated_power(), unit(1000) * (2 + 5 + 6 + 7));
    // 7 узлов -> 8 листьев, корень дерева узла 1 - лист сети 9
    assert_eq!(first.virtual_root_index, 9);
    let file = format!("node-tree-1000-{}-1.json.zst", Address([2; 20]));
    assert!(root.join("node-trees").join(&file).exists());
    assert!(root.join("node-trees").join("checksums.sha384").exists());

    let mut m = manager(&root, &chain)?;
    let again = m.get_node_tree(Some(1000), 1)?;
    assert_eq!(first, again);
    assert_eq!(chain.calls(), 1);
    assert_eq!(m.metrics().tree_cache_hits, 1);

    // другой индекс - другое дерево, но снапшот уже в кэше
    let other = m.get_node_tree(Some(1000), 0)?;
    assert_eq!(other.delegated_power(), unit(1000));
    assert_eq!(chain.calls(), 1);
    assert!(m.get_node_tree(Some(1000), 7).is_err());
    Ok(())
}

#[test]
fn voting_artifacts_prove_node_power_against_network_root() -> Result<()> {
    let root = unique_root("voting");
    let chain = FakeChain::new();
    let mut m = manager(&root, &chain)?;

    let va = m.artifacts_for_voting(1000, Address([2; 20]))?;
    assert_eq!(va.block_number, 1000);
    assert_eq!(va.node_index, 1);
    assert_eq!(va.total_delegated_power, unit(1000) * 20);
    assert_eq!(va.proof.len(), 3);
    assert_eq!(chain.calls(), 1);

    let network = m.get_network_tree(Some(1000))?;
    let leaf = leaf_for_balance(va.total_delegated_power);
    assert_eq!(&root_from_proof(&leaf, 9, &va.proof), network.root());

    // узел, всё делегировавший, голосует с нулевой мощностью
    let delegator = m.artifacts_for_voting(1000, Address([6; 20]))?;
    assert_eq!(delegator.node_index, 5);
    assert_eq!(delegator.total_delegated_power, 0);
    assert_eq!(
        &root_from_proof(&leaf_for_balance(0), 13, &delegator.proof),
        network.root()
    );

    let json = serde_json::to_value(&va)?;
    assert_eq!(json["totalDelegatedPower"], (unit(1000) * 20).to_string());
    assert_eq!(json["nodeIndex"], 1);

    let err = m.artifacts_for_voting(1000, Address([9; 20])).unwrap_err();
    assert!(format!("{:#}", err).contains("not in the voting info"), "{:#}", err);
    Ok(())
}

#[test]
fn challenge_response_picks_network_or_node_tree() -> Result<()> {
    let root = unique_root("challenge");
    let chain = FakeChain::new();
    let mut m = manager(&root, &chain)?;
    let u = unit(1000);

    // корень сети: строка на глубине 2 над листьями [u, 20u, 3u, 4u, 0, 0, 0, 0]
    let (net_root, row) = m.artifacts_for_challenge_response(1000, 1)?;
    assert_eq!(net_root.sum, 28 * u);
    assert_eq!(row.iter().map(|n| n.sum).collect::<Vec<_>>(), vec![21 * u, 7 * u, 0, 0]);

    // лист сети остаётся в дереве сети
    let (leaf, row) = m.artifacts_for_challenge_response(1000, 9)?;
    assert_eq!(leaf, leaf_for_balance(20 * u));
    assert_eq!(row, vec![leaf]);

    // 18 - левый ребёнок корня дерева узла 1, листья под ним [0, 2u, 0, 0]
    let (node, row) = m.artifacts_for_challenge_response(1000, 18)?;
    assert_eq!(node.sum, 2 * u);
    assert_eq!(row.iter().map(|n| n.sum).collect::<Vec<_>>(), vec![0, 2 * u, 0, 0]);
    assert!(root
        .join("node-trees")
        .join(format!("node-tree-1000-{}-1.json.zst", Address([2; 20])))
        .exists());

    // под листом-заполнителем 15 узла нет
    assert!(m.artifacts_for_challenge_response(1000, 30).is_err());
    assert_eq!(chain.calls(), 1);
    Ok(())
}

#[test]
fn honest_pollards_are_not_challengeable() -> Result<()> {
    let root = unique_root("checkpollard");
    let chain = FakeChain::new();
    let mut m = manager(&root, &chain)?;

    let (_, network_row) = m.artifacts_for_challenge_response(1000, 1)?;
    assert_eq!(m.check_for_challengeable_artifacts(1000, 1, &network_row)?, None);

    let mut forged = network_row.clone();
    forged[0].sum += 1;
    let ch = m
        .check_for_challengeable_artifacts(1000, 1, &forged)?
        .ok_or_else(|| anyhow!("forged network pollard accepted"))?;
    assert_eq!(ch.index, 4);
    assert_eq!(ch.node, forged[0]);
    assert_eq!(ch.proof.len(), 2);

    let (_, node_row) = m.artifacts_for_challenge_response(1000, 18)?;
    assert_eq!(m.check_for_challengeable_artifacts(1000, 18, &node_row)?, None);
    let mut forged = node_row.clone();
    forged[1] = leaf_for_balance(1);
    let ch = m
        .check_for_challengeable_artifacts(1000, 18, &forged)?
        .ok_or_else(|| anyhow!("forged node pollard accepted"))?;
    // строка под 18 на глубине 2: 72..=75
    assert_eq!(ch.index, 73);
    assert_eq!(ch.node, forged[1]);

    // неверный размер pollard-а - ошибка, а не челлендж
    assert!(m.check_for_challengeable_artifacts(1000, 1, &network_row[..3]).is_err());
    Ok(())
}

//! Pollard row for a new proposal, computed straight from voting records.
//!
//! The proposal tree has n·n leaves (n rounded up to a power of two): leaf (i, j)
//! holds the power node j delegates to node i. Only the row `depth_per_round` levels
//! below the root is needed, so each row node is reduced from its own leaf span and
//! the full n·n leaf set is never materialized.

use crate::types::{NodeVotingInfo, VotingTreeNode};

use super::{leaf_for_balance, parent_of};

/// Pure half of the tree generator: voting records in, pollard row out.
pub trait PollardBuilder {
    fn build_pollard(&self, voting_info: &[NodeVotingInfo]) -> Vec<VotingTreeNode>;
}

/// Default builder: SHA-256 summation tree, row at `depth_per_round`.
#[derive(Clone, Copy, Debug)]
pub struct TreeHashPollardBuilder {
    pub depth_per_round: u64,
}

impl TreeHashPollardBuilder {
    pub fn new(depth_per_round: u64) -> Self {
        Self { depth_per_round }
    }
}

impl PollardBuilder for TreeHashPollardBuilder {
    fn build_pollard(&self, voting_info: &[NodeVotingInfo]) -> Vec<VotingTreeNode> {
        build_pollard_row_for_proposal(voting_info, self.depth_per_round)
    }
}

/// Pollard row (root index 1) for a proposal over `voting_info`.
pub fn build_pollard_row_for_proposal(
    voting_info: &[NodeVotingInfo],
    depth_per_round: u64,
) -> Vec<VotingTreeNode> {
    let n = voting_info.len();
    if n == 0 {
        return Vec::new();
    }

    let per_node = n.next_power_of_two();
    let total_leaves = per_node * per_node;
    let depth = total_leaves.trailing_zeros() as u64;
    let order = depth_per_round.min(depth);
    let row_len = 1usize << order;
    let span = total_leaves / row_len;

    // Баланс листа (i, j): сила узла j, если он делегирует узлу i
    let balance = |leaf: usize| -> u128 {
        let (i, j) = (leaf / per_node, leaf % per_node);
        if i < n && j < n && voting_info[j].delegate == voting_info[i].node_address {
            voting_info[j].voting_power
        } else {
            0
        }
    };

    let mut scratch: Vec<VotingTreeNode> = Vec::with_capacity(span);
    (0..row_len)
        .map(|k| {
            scratch.clear();
            scratch.extend((k * span..(k + 1) * span).map(|leaf| leaf_for_balance(balance(leaf))));
            reduce_in_place(&mut scratch)
        })
        .collect()
}

/// Root of a power-of-two run of nodes, reducing pairwise in place.
fn reduce_in_place(nodes: &mut Vec<VotingTreeNode>) -> VotingTreeNode {
    let mut len = nodes.len();
    while len > 1 {
        for i in 0..len / 2 {
            nodes[i] = parent_of(&nodes[2 * i], &nodes[2 * i + 1]);
        }
        len /= 2;
    }
    nodes[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NetworkVotingTree;
    use crate::types::Address;

    fn addr(b: u8) -> Address {
        Address([b; 20])
    }

    fn info(node: u8, power: u128, delegate: u8) -> NodeVotingInfo {
        NodeVotingInfo {
            node_address: addr(node),
            voting_power: power,
            delegate: addr(delegate),
        }
    }

    #[test]
    fn row_sums_to_total_power() {
        let records = vec![info(1, 10, 1), info(2, 20, 1), info(3, 30, 3)];
        let row = build_pollard_row_for_proposal(&records, 5);
        // 3 узла -> 4x4 = 16 листьев, глубина 4, строка ограничена листьями
        assert_eq!(row.len(), 16);
        assert_eq!(row.iter().map(|n| n.sum).sum::<u128>(), 60);
        // строка 0 (узел 1): сам узел 1 и делегировавший ему узел 2
        assert_eq!(row[0].sum, 10);
        assert_eq!(row[1].sum, 20);
        assert_eq!(row[2].sum, 0);
        assert_eq!(row[10].sum, 30);
    }

    #[test]
    fn row_matches_materialized_tree() {
        let records: Vec<_> = (1..=5u8).map(|i| info(i, i as u128 * 7, if i % 2 == 0 { 1 } else { i })).collect();
        let per = 8usize;
        let mut leaves = Vec::with_capacity(per * per);
        for i in 0..per {
            for j in 0..per {
                let b = if i < 5 && j < 5 && records[j].delegate == records[i].node_address {
                    records[j].voting_power
                } else {
                    0
                };
                leaves.push(leaf_for_balance(b));
            }
        }
        let tree = NetworkVotingTree::from_leaves(1, "mainnet", &leaves, 1, 3);
        let (_, expected) = tree.pollard_for_proposal().unwrap();
        assert_eq!(build_pollard_row_for_proposal(&records, 3), expected);
    }

    #[test]
    fn empty_and_single_records() {
        assert!(build_pollard_row_for_proposal(&[], 5).is_empty());
        let row = build_pollard_row_for_proposal(&[info(1, 99, 1)], 5);
        assert_eq!(row, vec![leaf_for_balance(99)]);
    }

    #[test]
    fn builder_is_deterministic() {
        let records = vec![info(4, 1, 4), info(5, 2, 4)];
        let b = TreeHashPollardBuilder::new(2);
        assert_eq!(b.build_pollard(&records), b.build_pollard(&records));
    }
}

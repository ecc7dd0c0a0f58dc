//! Core data model: participants' voting records, snapshots and tree nodes.

use anyhow::{anyhow, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::util::{dec_u128, hex32};
use crate::version::GENERATOR_VERSION;

/// 20-byte account address, "0x"-hex in JSON.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let raw = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .unwrap_or(raw);
        let mut out = [0u8; 20];
        hex::decode_to_slice(raw, &mut out).map_err(|e| anyhow!("bad address {}: {}", s, e))?;
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Address::from_str(&s).map_err(de::Error::custom)
    }
}

/// Voting power and delegation of one node at a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVotingInfo {
    pub node_address: Address,
    #[serde(with = "dec_u128")]
    pub voting_power: u128,
    /// Node this one delegates its power to (itself when not delegating).
    pub delegate: Address,
}

/// Voting power and delegation of every node at one execution block.
///
/// Content is deterministic for (network, block_number) under one generator
/// version, so a checksum over the stored bytes is a valid integrity check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingPowerSnapshot {
    pub generator_version: String,
    pub network: String,
    pub block_number: u32,
    /// Generator order; not semantically meaningful but preserved byte-for-byte.
    pub voting_info: Vec<NodeVotingInfo>,
}

impl VotingPowerSnapshot {
    /// New snapshot stamped with this crate's generator version.
    pub fn new<S: Into<String>>(network: S, block_number: u32, voting_info: Vec<NodeVotingInfo>) -> Self {
        Self {
            generator_version: GENERATOR_VERSION.to_string(),
            network: network.into(),
            block_number,
            voting_info,
        }
    }

    pub fn total_voting_power(&self) -> u128 {
        self.voting_info
            .iter()
            .fold(0u128, |acc, i| acc.saturating_add(i.voting_power))
    }
}

/// Node of a summation Merkle tree: hash commits to the subtree, sum is its total power.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingTreeNode {
    #[serde(with = "dec_u128")]
    pub sum: u128,
    #[serde(with = "hex32")]
    pub hash: [u8; 32],
}

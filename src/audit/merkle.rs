//! Rollup Hashing for Checkpoints
//!
//! Summarizes an ordered run of content hashes into a single digest. Two
//! shapes are supported: a flat hash-of-hashes, and a Merkle tree whose
//! root additionally supports inclusion proofs for single events.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::audit::event::ContentHash;
use crate::error::{LedgerError, LedgerResult};

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;
const FLAT_TAG: u8 = 0x02;

/// How a checkpoint's rollup hash was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupKind {
    #[default]
    Flat,
    Merkle,
}

impl RollupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollupKind::Flat => "flat",
            RollupKind::Merkle => "merkle",
        }
    }

    /// Rollup digest over `hashes` in this shape.
    pub fn rollup(&self, hashes: &[ContentHash]) -> ContentHash {
        match self {
            RollupKind::Flat => flat_rollup(hashes),
            RollupKind::Merkle => merkle_root(hashes),
        }
    }
}

impl fmt::Display for RollupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RollupKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(RollupKind::Flat),
            "merkle" => Ok(RollupKind::Merkle),
            other => Err(LedgerError::corrupt(format!("unknown rollup kind {:?}", other))),
        }
    }
}

/// `SHA-256(0x02 || count || h_1 || ... || h_n)`.
pub fn flat_rollup(hashes: &[ContentHash]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update([FLAT_TAG]);
    hasher.update((hashes.len() as u64).to_be_bytes());
    for hash in hashes {
        hasher.update(hash.as_bytes());
    }
    ContentHash::from_bytes(hasher.finalize().into())
}

fn leaf_hash(hash: &ContentHash) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(hash.as_bytes());
    ContentHash::from_bytes(hasher.finalize().into())
}

fn node_hash(left: &ContentHash, right: &ContentHash) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    ContentHash::from_bytes(hasher.finalize().into())
}

/// Build every level of the tree, leaves first. An odd node at the end of a
/// level is promoted to the next level unchanged, so padding a list with a
/// copy of its last hash yields a different root.
fn build_levels(hashes: &[ContentHash]) -> Vec<Vec<ContentHash>> {
    let mut levels = vec![hashes.iter().map(leaf_hash).collect::<Vec<_>>()];

    while levels.last().map_or(false, |level| level.len() > 1) {
        let current = &levels[levels.len() - 1];
        let next: Vec<ContentHash> = current
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(left, right),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        levels.push(next);
    }

    levels
}

/// Merkle root over the ordered content hashes. The root of an empty list
/// is the flat rollup of nothing, so it stays well defined.
pub fn merkle_root(hashes: &[ContentHash]) -> ContentHash {
    if hashes.is_empty() {
        return flat_rollup(hashes);
    }
    let levels = build_levels(hashes);
    let root = levels[levels.len() - 1][0];
    debug!("Merkle root over {} hashes: {}", hashes.len(), root);
    root
}

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: ContentHash,
    pub side: Side,
}

/// Inclusion proof for one content hash under a Merkle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf: ContentHash,
    pub steps: Vec<ProofStep>,
    pub root: ContentHash,
}

impl MerkleProof {
    /// Recompute the root from the leaf and sibling path.
    pub fn verify(&self) -> bool {
        let mut current = leaf_hash(&self.leaf);
        for step in &self.steps {
            current = match step.side {
                Side::Left => node_hash(&step.sibling, &current),
                Side::Right => node_hash(&current, &step.sibling),
            };
        }
        current == self.root
    }

    pub fn size(&self) -> usize {
        self.steps.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "Merkle proof for leaf {}: {} steps, root: {}",
            self.leaf_index,
            self.steps.len(),
            self.root
        )
    }
}

/// Generate an inclusion proof for `hashes[index]`.
pub fn prove(hashes: &[ContentHash], index: usize) -> LedgerResult<MerkleProof> {
    if index >= hashes.len() {
        return Err(LedgerError::InvalidRange(format!(
            "leaf index {} out of range for {} hashes",
            index,
            hashes.len()
        )));
    }

    let levels = build_levels(hashes);
    let mut steps = Vec::with_capacity(levels.len().saturating_sub(1));
    let mut position = index;

    for level in &levels[..levels.len() - 1] {
        if position % 2 == 1 {
            steps.push(ProofStep { sibling: level[position - 1], side: Side::Left });
        } else if let Some(sibling) = level.get(position + 1) {
            steps.push(ProofStep { sibling: *sibling, side: Side::Right });
        }
        // an unpaired last node moves up without a step
        position /= 2;
    }

    Ok(MerkleProof {
        leaf_index: index,
        leaf: hashes[index],
        steps,
        root: levels[levels.len() - 1][0],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(count: u8) -> Vec<ContentHash> {
        (1..=count).map(|i| ContentHash::from_bytes([i; 32])).collect()
    }

    #[test]
    fn test_flat_rollup_depends_on_order_and_count() {
        let hs = hashes(3);
        let mut reversed = hs.clone();
        reversed.reverse();
        assert_ne!(flat_rollup(&hs), flat_rollup(&reversed));
        assert_ne!(flat_rollup(&hs[..2]), flat_rollup(&hs));
        assert_eq!(flat_rollup(&hs), flat_rollup(&hashes(3)));
    }

    #[test]
    fn test_merkle_root_single_leaf() {
        let hs = hashes(1);
        assert_eq!(merkle_root(&hs), leaf_hash(&hs[0]));
    }

    #[test]
    fn test_merkle_root_changes_with_any_leaf() {
        let hs = hashes(7);
        let root = merkle_root(&hs);
        for i in 0..hs.len() {
            let mut altered = hs.clone();
            altered[i] = ContentHash::from_bytes([0xee; 32]);
            assert_ne!(merkle_root(&altered), root, "leaf {} must affect the root", i);
        }
    }

    #[test]
    fn test_proofs_verify_for_every_leaf() {
        for count in [1u8, 2, 3, 5, 8, 13] {
            let hs = hashes(count);
            let root = merkle_root(&hs);
            for index in 0..hs.len() {
                let proof = prove(&hs, index).unwrap();
                assert_eq!(proof.root, root);
                assert!(proof.verify(), "proof {} of {} must verify", index, count);
            }
        }
    }

    #[test]
    fn test_padded_list_has_a_different_root() {
        let hs = hashes(3);
        let mut padded = hs.clone();
        padded.push(hs[2]);
        assert_ne!(merkle_root(&hs), merkle_root(&padded));

        let proof = prove(&padded, 3).unwrap();
        assert!(proof.verify());
        assert_ne!(proof.root, merkle_root(&hs));
    }

    #[test]
    fn test_unpaired_leaf_is_promoted() {
        let hs = hashes(3);
        let expected = node_hash(&node_hash(&leaf_hash(&hs[0]), &leaf_hash(&hs[1])), &leaf_hash(&hs[2]));
        assert_eq!(merkle_root(&hs), expected);

        let proof = prove(&hs, 2).unwrap();
        assert_eq!(proof.size(), 1);
        assert!(proof.verify());
    }

    #[test]
    fn test_forged_proof_fails() {
        let hs = hashes(6);
        let mut proof = prove(&hs, 4).unwrap();
        proof.leaf = ContentHash::from_bytes([0x99; 32]);
        assert!(!proof.verify());

        let mut proof = prove(&hs, 1).unwrap();
        proof.steps[0].side = Side::Right;
        assert!(!proof.verify());
    }

    #[test]
    fn test_prove_out_of_range() {
        assert!(prove(&hashes(3), 3).is_err());
        assert!(prove(&[], 0).is_err());
    }

    #[test]
    fn test_rollup_kind_round_trip_text() {
        assert_eq!("merkle".parse::<RollupKind>().unwrap(), RollupKind::Merkle);
        assert_eq!(RollupKind::Flat.to_string(), "flat");
        assert!("tree".parse::<RollupKind>().is_err());
    }
}

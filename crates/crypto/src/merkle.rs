//! Merkle trees over proof digests.
//!
//! - Leaf nodes are `H(digest)`; interior nodes are `H(left || right)`.
//! - The leaf level is padded to the next power of two by repeating the last
//!   leaf, so every level has an even width and every leaf has a sibling.
//! - Leaves keep the order they were given in. Callers sort by proof id
//!   before building so that any party rebuilding the tree gets the same root.

use crate::hashing::{hash, hash_pair};
use fedrelay_core::Digest;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Merkle construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Empty leaf set: cannot build Merkle tree from empty leaves")]
    EmptyLeaves,

    #[error("Invalid leaf index: {index} (tree has {count} leaves)")]
    InvalidLeafIndex { index: usize, count: usize },
}

pub type Result<T> = std::result::Result<T, MerkleError>;

/// Position of a sibling relative to the running hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// One step from a node towards the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Sibling hashes from leaf to root (bottom-up)
pub type MerklePath = Vec<PathStep>;

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Digests as supplied, unpadded
    digests: Vec<Digest>,
    /// Levels bottom-up; level 0 holds the padded leaf hashes
    levels: Vec<Vec<Digest>>,
}

impl MerkleTree {
    /// Build a tree whose leaves are the given digests, in order.
    pub fn build(digests: &[Digest]) -> Result<Self> {
        let last = match digests.last() {
            Some(last) => *last,
            None => return Err(MerkleError::EmptyLeaves),
        };

        let width = digests.len().next_power_of_two();
        let mut leaves: Vec<Digest> = digests.iter().map(|d| hash(d)).collect();
        leaves.resize(width, hash(&last));

        let mut levels = vec![leaves];
        while let Some(current) = levels.last() {
            if current.len() == 1 {
                break;
            }
            let next: Vec<Digest> = current
                .chunks(2)
                .map(|pair| hash_pair(&pair[0], &pair[1]))
                .collect();
            levels.push(next);
        }

        Ok(Self {
            digests: digests.to_vec(),
            levels,
        })
    }

    pub fn root(&self) -> Digest {
        // build() guarantees a single-node top level
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_default()
    }

    /// Number of supplied digests (padding excluded)
    pub fn leaf_count(&self) -> usize {
        self.digests.len()
    }

    pub fn digests(&self) -> &[Digest] {
        &self.digests
    }

    /// Index of the first leaf holding `digest`
    pub fn position(&self, digest: &Digest) -> Option<usize> {
        self.digests.iter().position(|d| d == digest)
    }

    /// Inclusion path for the leaf at `index`
    pub fn path(&self, index: usize) -> Result<MerklePath> {
        if index >= self.digests.len() {
            return Err(MerkleError::InvalidLeafIndex {
                index,
                count: self.digests.len(),
            });
        }

        let mut steps = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut current = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let step = if current % 2 == 0 {
                PathStep {
                    sibling: level[current + 1],
                    side: Side::Right,
                }
            } else {
                PathStep {
                    sibling: level[current - 1],
                    side: Side::Left,
                }
            };
            steps.push(step);
            current /= 2;
        }

        Ok(steps)
    }
}

/// Root obtained by walking `path` upward from `H(digest)`
pub fn compute_root(digest: &Digest, path: &[PathStep]) -> Digest {
    path.iter().fold(hash(digest), |acc, step| match step.side {
        Side::Right => hash_pair(&acc, &step.sibling),
        Side::Left => hash_pair(&step.sibling, &acc),
    })
}

pub fn verify_path(digest: &Digest, path: &[PathStep], root: &Digest) -> bool {
    compute_root(digest, path) == *root
}

/// `H(root_1 || ... || root_n)` with roots ordered by federation id.
///
/// The result does not depend on the iteration order of `roots`.
pub fn global_root<'a, I>(roots: I) -> Digest
where
    I: IntoIterator<Item = (&'a str, &'a Digest)>,
{
    let mut ordered: Vec<(&str, &Digest)> = roots.into_iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = blake3::Hasher::new();
    for (_, root) in ordered {
        hasher.update(root);
    }
    *hasher.finalize().as_bytes()
}

//! Merkle commitment over the transactions of a block.
//!
//! Leaf hashes are sorted ascending by byte order, then paired level by
//! level; a level with odd cardinality duplicates its last node. Internal
//! node values are `Keccak256(left || right)`.
//!
//! Verification paths use level-order (BFS) indices counted from the root
//! at index 0. Duplicated nodes occupy their own BFS slots, so the indexed
//! tree is always a perfect binary tree and the usual heap arithmetic
//! (`parent = (i - 1) / 2`) applies. A path maps each sibling's BFS index
//! to its digest and additionally carries the root at index 0; recomputing
//! the root from a leaf needs nothing else.

use std::collections::BTreeMap;

use crate::crypto::keccak256;
use crate::types::Hash256;

struct MerkleNode {
    data: Hash256,
    left: Option<usize>,
    right: Option<usize>,
}

/// Merkle tree over a non-empty set of leaf digests.
pub struct MerkleTree {
    // Arena of nodes; duplicated nodes are shared by index, mirroring the
    // level construction.
    nodes: Vec<MerkleNode>,
    root: usize,
}

impl MerkleTree {
    /// Builds a tree from leaf digests. Returns `None` for an empty input.
    pub fn build(leaf_hashes: &[Hash256]) -> Option<MerkleTree> {
        if leaf_hashes.is_empty() {
            return None;
        }

        let mut leaves: Vec<Hash256> = leaf_hashes.to_vec();
        leaves.sort();

        let mut nodes: Vec<MerkleNode> = Vec::with_capacity(leaves.len() * 2);
        let mut level: Vec<usize> = Vec::with_capacity(leaves.len() + 1);
        for data in leaves {
            nodes.push(MerkleNode {
                data,
                left: None,
                right: None,
            });
            level.push(nodes.len() - 1);
        }
        if level.len() % 2 != 0 {
            level.push(*level.last().expect("level is non-empty"));
        }

        while level.len() > 1 {
            if level.len() % 2 != 0 {
                level.push(*level.last().expect("level is non-empty"));
            }
            let mut next = Vec::with_capacity(level.len() / 2);
            for pair in level.chunks(2) {
                let (left, right) = (pair[0], pair[1]);
                let mut concat = [0u8; 64];
                concat[..32].copy_from_slice(nodes[left].data.as_bytes());
                concat[32..].copy_from_slice(nodes[right].data.as_bytes());
                nodes.push(MerkleNode {
                    data: keccak256(&concat),
                    left: Some(left),
                    right: Some(right),
                });
                next.push(nodes.len() - 1);
            }
            level = next;
        }

        let root = level[0];
        Some(MerkleTree { nodes, root })
    }

    /// The root digest committing to all leaves.
    pub fn root(&self) -> Hash256 {
        self.nodes[self.root].data
    }

    /// Level-order walk of the tree, yielding arena indices. Duplicated
    /// nodes are visited once per BFS slot.
    fn bfs_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len() * 2);
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(self.root);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(left) = self.nodes[id].left {
                queue.push_back(left);
            }
            if let Some(right) = self.nodes[id].right {
                queue.push_back(right);
            }
        }
        order
    }

    /// Last BFS position holding `data`, if any. Duplicated leaves resolve
    /// to their final slot.
    fn find_bfs_index(&self, order: &[usize], data: &Hash256) -> Option<usize> {
        let mut found = None;
        for (position, id) in order.iter().enumerate() {
            if &self.nodes[*id].data == data {
                found = Some(position);
            }
        }
        found
    }

    /// The sibling digests needed to recompute the root from `leaf`,
    /// keyed by BFS index, with the root itself included at index 0.
    ///
    /// Returns `None` when the leaf is not part of the tree (or resolves
    /// to the root, which cannot be proven against itself).
    pub fn verification_path(&self, leaf: &Hash256) -> Option<BTreeMap<usize, Hash256>> {
        let order = self.bfs_order();
        let index = self.find_bfs_index(&order, leaf)?;
        if index == 0 {
            return None;
        }

        let mut path = BTreeMap::new();
        let mut cursor = index;
        while cursor > 0 {
            let sibling = if cursor % 2 != 0 {
                cursor + 1
            } else {
                cursor - 1
            };
            path.insert(sibling, self.nodes[order[sibling]].data);
            cursor = (cursor - 1) / 2;
        }
        path.insert(0, self.root());

        Some(path)
    }

    /// Client-side check: recomputes the root from a leaf digest and a
    /// verification path produced by [`MerkleTree::verification_path`].
    ///
    /// The path alone fixes the leaf's position: each sibling index tells
    /// us which side the sibling sits on (odd indices are left children).
    pub fn verify_path(leaf: &Hash256, path: &BTreeMap<usize, Hash256>) -> bool {
        let Some(expected_root) = path.get(&0) else {
            return false;
        };

        let mut current = *leaf;
        for (&sibling_index, sibling) in path.iter().rev() {
            if sibling_index == 0 {
                break;
            }
            let mut concat = [0u8; 64];
            if sibling_index % 2 != 0 {
                // Sibling is a left child, the running hash is on the right.
                concat[..32].copy_from_slice(sibling.as_bytes());
                concat[32..].copy_from_slice(current.as_bytes());
            } else {
                concat[..32].copy_from_slice(current.as_bytes());
                concat[32..].copy_from_slice(sibling.as_bytes());
            }
            current = keccak256(&concat);
        }

        current == *expected_root
    }
}

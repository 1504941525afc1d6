//! # Structural Verifier
//!
//! Walks the whole index and cross-checks every invariant the other
//! modules rely on:
//!
//! - the root block carries the root kind, everything below it is interior
//!   or leaf, and no other kind is reachable;
//! - keys are strictly ascending within every node and entry counts never
//!   exceed the capacity for the kind;
//! - each separator equals the smallest key of the subtree behind the
//!   pointer to its right, and everything to its left stays strictly
//!   smaller;
//! - the walk reaches every block at most once (no cycles, no sharing);
//! - the leaves together hold exactly the number of keys the superblock
//!   counts;
//! - the free list is well formed, disjoint from the tree, and the tree,
//!   the free list and the superblock together account for every block.
//!
//! ## Occupancy floors
//!
//! A minimum fill check is available but disabled by default: halving
//! splits legitimately leave nodes around 50% full, and the leftmost leaf
//! stays empty from the moment the root is seeded until a key smaller than
//! the first router key arrives. The stricter floors are useful against
//! mature, well-mixed trees; they are advisory, not part of the format.

use eyre::{bail, Result};
use hashbrown::HashSet;

use super::header::NodeKind;
use super::node::Node;
use super::tree::BTreeIndex;
use crate::cache::BlockCache;
use crate::error::IndexError;

/// Minimum fill to demand of every node below the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OccupancyFloor {
    /// No minimum (the default; always holds).
    #[default]
    Disabled,
    /// At least one entry.
    AtLeastOne,
    /// At least half of the kind's capacity.
    Half,
    /// At least two thirds of the kind's capacity.
    TwoThirds,
}

impl OccupancyFloor {
    fn allows(self, count: usize, capacity: usize) -> bool {
        match self {
            OccupancyFloor::Disabled => true,
            OccupancyFloor::AtLeastOne => count >= 1,
            OccupancyFloor::Half => count * 2 >= capacity,
            OccupancyFloor::TwoThirds => count * 3 >= capacity * 2,
        }
    }
}

/// Knobs for [`BTreeIndex::sanity_check_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    pub occupancy: OccupancyFloor,
}

struct SubtreeSummary {
    leaf_keys: u64,
    min: Option<Vec<u8>>,
    max: Option<Vec<u8>>,
}

fn printable(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

impl<C: BlockCache> BTreeIndex<C> {
    /// Verifies the structural invariants with the default options.
    pub fn sanity_check(&mut self) -> Result<()> {
        self.sanity_check_with(CheckOptions::default())
    }

    /// Verifies the structural invariants. Any violation surfaces as
    /// [`IndexError::Corrupt`]; a corrupt index must not be retried.
    pub fn sanity_check_with(&mut self, options: CheckOptions) -> Result<()> {
        let mut visited = HashSet::new();
        let root_no = self.root_block();
        let summary = self.check_block(root_no, true, options, &mut visited)?;

        let counted = self.key_count();
        if summary.leaf_keys != counted {
            bail!(IndexError::Corrupt(format!(
                "leaves hold {} keys, superblock counts {}",
                summary.leaf_keys, counted
            )));
        }

        let free = self.free_list_blocks()?;
        for &block_no in &free {
            if visited.contains(&block_no) {
                bail!(IndexError::Corrupt(format!(
                    "block {} is both in the tree and on the free list",
                    block_no
                )));
            }
        }

        let accounted = visited.len() + free.len() + 1; // + superblock
        let block_count = self.cache.block_count() as usize;
        if accounted != block_count {
            bail!(IndexError::Corrupt(format!(
                "{} tree blocks, {} free blocks and the superblock cover {} of {} blocks",
                visited.len(),
                free.len(),
                accounted,
                block_count
            )));
        }
        Ok(())
    }

    fn check_block(
        &mut self,
        block_no: u32,
        expect_root: bool,
        options: CheckOptions,
        visited: &mut HashSet<u32>,
    ) -> Result<SubtreeSummary> {
        if block_no >= self.cache.block_count() {
            bail!(IndexError::Corrupt(format!(
                "tree points at block {} (block_count={})",
                block_no,
                self.cache.block_count()
            )));
        }
        if !visited.insert(block_no) {
            bail!(IndexError::Corrupt(format!(
                "block {} reached twice in the tree walk",
                block_no
            )));
        }

        let node = Node::read_from(&mut self.cache, block_no)?;
        let kind = node.kind()?;
        match kind {
            NodeKind::Root | NodeKind::Interior => {
                if expect_root != (kind == NodeKind::Root) {
                    bail!(IndexError::Corrupt(format!(
                        "{:?} block {} found {} the root position",
                        kind,
                        block_no,
                        if expect_root { "in" } else { "below" }
                    )));
                }
                let n = node.entry_count();
                if n > node.interior_capacity() {
                    bail!(IndexError::Corrupt(format!(
                        "block {} holds {} separators, capacity is {}",
                        block_no,
                        n,
                        node.interior_capacity()
                    )));
                }
                self.check_ascending(&node, block_no)?;
                if n == 0 {
                    // Only the never-seeded root may be empty.
                    if !expect_root {
                        bail!(IndexError::Corrupt(format!(
                            "interior block {} has no separators",
                            block_no
                        )));
                    }
                    return Ok(SubtreeSummary {
                        leaf_keys: 0,
                        min: None,
                        max: None,
                    });
                }
                if !expect_root && !options.occupancy.allows(n, node.interior_capacity()) {
                    bail!(IndexError::Corrupt(format!(
                        "interior block {} holds {} of {} separators, below the configured floor",
                        block_no,
                        n,
                        node.interior_capacity()
                    )));
                }

                let mut leaf_keys = 0u64;
                let mut min: Option<Vec<u8>> = None;
                let mut max: Option<Vec<u8>> = None;
                for slot in 0..=n {
                    let child = node.child_at(slot)?;
                    let summary = self.check_block(child, false, options, visited)?;

                    if slot > 0 {
                        let separator = node.key_at(slot - 1)?;
                        match summary.min.as_deref() {
                            Some(smallest) if smallest == separator => {}
                            Some(smallest) => bail!(IndexError::Corrupt(format!(
                                "separator '{}' in block {} does not open its right subtree (smallest key '{}')",
                                printable(separator),
                                block_no,
                                printable(smallest)
                            ))),
                            None => bail!(IndexError::Corrupt(format!(
                                "separator '{}' in block {} fronts an empty subtree",
                                printable(separator),
                                block_no
                            ))),
                        }
                    }
                    if slot < n {
                        let separator = node.key_at(slot)?;
                        if let Some(largest) = summary.max.as_deref() {
                            if largest >= separator {
                                bail!(IndexError::Corrupt(format!(
                                    "key '{}' under child {} of block {} is not below separator '{}'",
                                    printable(largest),
                                    slot,
                                    block_no,
                                    printable(separator)
                                )));
                            }
                        }
                    }

                    leaf_keys += summary.leaf_keys;
                    if summary.min.is_some() {
                        if min.is_none() {
                            min = summary.min;
                        }
                        max = summary.max;
                    }
                }
                Ok(SubtreeSummary {
                    leaf_keys,
                    min,
                    max,
                })
            }
            NodeKind::Leaf => {
                if expect_root {
                    bail!(IndexError::Corrupt(format!(
                        "root block {} is a leaf",
                        block_no
                    )));
                }
                let n = node.entry_count();
                if n > node.leaf_capacity() {
                    bail!(IndexError::Corrupt(format!(
                        "leaf block {} holds {} pairs, capacity is {}",
                        block_no,
                        n,
                        node.leaf_capacity()
                    )));
                }
                self.check_ascending(&node, block_no)?;
                if !options.occupancy.allows(n, node.leaf_capacity()) {
                    bail!(IndexError::Corrupt(format!(
                        "leaf block {} holds {} of {} pairs, below the configured floor",
                        block_no,
                        n,
                        node.leaf_capacity()
                    )));
                }

                let min = if n > 0 {
                    Some(node.key_at(0)?.to_vec())
                } else {
                    None
                };
                let max = if n > 0 {
                    Some(node.key_at(n - 1)?.to_vec())
                } else {
                    None
                };
                Ok(SubtreeSummary {
                    leaf_keys: n as u64,
                    min,
                    max,
                })
            }
            other => bail!(IndexError::Corrupt(format!(
                "tree walk reached a {:?} block {}",
                other, block_no
            ))),
        }
    }

    fn check_ascending(&self, node: &Node, block_no: u32) -> Result<()> {
        for slot in 1..node.entry_count() {
            if node.key_at(slot - 1)? >= node.key_at(slot)? {
                bail!(IndexError::Corrupt(format!(
                    "keys out of order in block {} at slot {}",
                    block_no, slot
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::SUPERBLOCK_NO;

    fn populated_index(keys: u32) -> BTreeIndex<MemoryCache> {
        let cache = MemoryCache::new(128, 512).unwrap();
        let mut index = BTreeIndex::create(cache, 4, 4).unwrap();
        for i in 0..keys {
            let key = format!("{:04}", i);
            index.insert(key.as_bytes(), b"....").unwrap();
        }
        index
    }

    #[test]
    fn fresh_and_populated_indexes_pass() {
        populated_index(0).sanity_check().unwrap();
        populated_index(1).sanity_check().unwrap();
        populated_index(300).sanity_check().unwrap();
    }

    #[test]
    fn strict_floors_flag_the_seeded_left_leaf() {
        let mut index = populated_index(1);

        index.sanity_check().unwrap();
        let err = index
            .sanity_check_with(CheckOptions {
                occupancy: OccupancyFloor::AtLeastOne,
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn floors_are_opt_in() {
        let mut index = populated_index(300);

        // Halving splits leave ~50% nodes behind, so the strict floor
        // flags a legitimate tree while the default accepts it.
        index.sanity_check().unwrap();
        let err = index
            .sanity_check_with(CheckOptions {
                occupancy: OccupancyFloor::TwoThirds,
            })
            .unwrap_err();
        assert!(err.to_string().contains("below the configured floor"));
    }

    #[test]
    fn miscounted_superblock_is_detected() {
        let mut index = populated_index(10);
        index.superblock.header_mut().set_entry_count(9);
        index.write_superblock().unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("superblock counts"));
    }

    #[test]
    fn out_of_order_keys_are_detected() {
        let mut index = populated_index(10);

        // Swap two keys inside the leaf that holds the upper range.
        let root_block_no = index.root_block();
        let root = Node::read_from(&mut index.cache, root_block_no).unwrap();
        let leaf_no = root.child_at(1).unwrap();
        let mut leaf = Node::read_from(&mut index.cache, leaf_no).unwrap();
        let first = leaf.key_at(0).unwrap().to_vec();
        let second = leaf.key_at(1).unwrap().to_vec();
        leaf.set_key(0, &second).unwrap();
        leaf.set_key(1, &first).unwrap();
        leaf.write_to(&mut index.cache, leaf_no).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn tree_block_on_the_free_list_is_detected() {
        let mut index = populated_index(10);

        let root_block_no = index.root_block();
        let root = Node::read_from(&mut index.cache, root_block_no).unwrap();
        let leaf_no = root.child_at(1).unwrap();
        index.superblock.header_mut().set_free_next(leaf_no);
        index.write_superblock().unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn leaked_block_breaks_the_partition() {
        let mut index = populated_index(10);

        // Take a block off the free list and write a typed node nobody
        // references.
        let orphan = index.allocate_block().unwrap();
        let node = Node::new(NodeKind::Leaf, 4, 4, 128, index.root_block());
        node.write_to(&mut index.cache, orphan).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(err.to_string().contains("cover"));
    }

    #[test]
    fn unknown_kind_in_the_tree_is_detected() {
        let mut index = populated_index(10);

        let root_block_no = index.root_block();
        let root = Node::read_from(&mut index.cache, root_block_no).unwrap();
        let leaf_no = root.child_at(0).unwrap();
        let mut raw = vec![0u8; index.block_size()];
        index.cache.read_block(leaf_no, &mut raw).unwrap();
        raw[0] = 0x7F;
        index.cache.write_block(leaf_no, &raw).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn superblock_stays_out_of_the_walk() {
        let mut index = populated_index(10);

        // Aim a child pointer at block 0.
        let root_no = index.root_block();
        let mut root = Node::read_from(&mut index.cache, root_no).unwrap();
        root.set_child(0, SUPERBLOCK_NO).unwrap();
        root.write_to(&mut index.cache, root_no).unwrap();

        let err = index.sanity_check().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Corrupt(_))
        ));
    }
}

//! # Traversal Emitters
//!
//! Three ways to look at the same in-order walk:
//!
//! - [`DisplayStyle::DepthFirst`]: one line per block, root first, children
//!   in pointer order. The raw structure, for eyeballing a small tree.
//! - [`DisplayStyle::Dot`]: the same walk as a graphviz digraph, one node
//!   per block plus parent-to-child edges.
//! - [`DisplayStyle::SortedKeyValue`]: `(key,value)` lines in ascending key
//!   order, nothing about the structure.
//!
//! Keys and values are opaque bytes; they are rendered as lossy UTF-8,
//! which is exact for the ASCII keys the shell produces.

use std::io::Write;

use eyre::{bail, Result};

use super::header::NodeKind;
use super::node::Node;
use super::tree::BTreeIndex;
use crate::cache::BlockCache;
use crate::error::IndexError;

/// Output format for [`BTreeIndex::display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStyle {
    /// One line per block, depth first.
    DepthFirst,
    /// Graphviz digraph of the block structure.
    Dot,
    /// `(key,value)` per line, ascending.
    SortedKeyValue,
}

fn printable(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl<C: BlockCache> BTreeIndex<C> {
    /// Writes the tree to `out` in the requested style.
    pub fn display<W: Write>(&mut self, out: &mut W, style: DisplayStyle) -> Result<()> {
        match style {
            DisplayStyle::SortedKeyValue => {
                for (key, value) in self.entries()? {
                    writeln!(out, "({},{})", printable(&key), printable(&value))?;
                }
            }
            DisplayStyle::DepthFirst => {
                let root_no = self.root_block();
                self.display_block(out, root_no, false)?;
            }
            DisplayStyle::Dot => {
                writeln!(out, "digraph index {{")?;
                let root_no = self.root_block();
                self.display_block(out, root_no, true)?;
                writeln!(out, "}}")?;
            }
        }
        Ok(())
    }

    fn display_block<W: Write>(&mut self, out: &mut W, block_no: u32, dot: bool) -> Result<()> {
        let node = Node::read_from(&mut self.cache, block_no)?;
        let kind = node.kind()?;
        let label = node_label(&node, kind, block_no)?;

        if dot {
            writeln!(out, "  {} [ label=\"{}: {}\" ];", block_no, block_no, label)?;
        } else {
            writeln!(out, "{}: {}", block_no, label)?;
        }

        if matches!(kind, NodeKind::Root | NodeKind::Interior) && node.entry_count() > 0 {
            for slot in 0..=node.entry_count() {
                let child = node.child_at(slot)?;
                if dot {
                    writeln!(out, "  {} -> {};", block_no, child)?;
                }
                self.display_block(out, child, dot)?;
            }
        }
        Ok(())
    }
}

fn node_label(node: &Node, kind: NodeKind, block_no: u32) -> Result<String> {
    match kind {
        NodeKind::Root | NodeKind::Interior => {
            let tag = if kind == NodeKind::Root {
                "root"
            } else {
                "interior"
            };
            let n = node.entry_count();
            if n == 0 {
                return Ok(format!("{} (empty)", tag));
            }
            let mut label = String::from(tag);
            for slot in 0..n {
                label.push_str(&format!(
                    " *{} {}",
                    node.child_at(slot)?,
                    printable(node.key_at(slot)?)
                ));
            }
            label.push_str(&format!(" *{}", node.child_at(n)?));
            Ok(label)
        }
        NodeKind::Leaf => {
            let mut label = String::from("leaf");
            for slot in 0..node.entry_count() {
                label.push_str(&format!(
                    " ({},{})",
                    printable(node.key_at(slot)?),
                    printable(node.value_at(slot)?)
                ));
            }
            Ok(label)
        }
        other => bail!(IndexError::Corrupt(format!(
            "display reached a {:?} block {}",
            other, block_no
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn sample_index() -> BTreeIndex<MemoryCache> {
        let cache = MemoryCache::new(128, 64).unwrap();
        let mut index = BTreeIndex::create(cache, 4, 4).unwrap();
        index.insert(b"bbbb", b"2222").unwrap();
        index.insert(b"aaaa", b"1111").unwrap();
        index.insert(b"cccc", b"3333").unwrap();
        index
    }

    fn render(index: &mut BTreeIndex<MemoryCache>, style: DisplayStyle) -> String {
        let mut out = Vec::new();
        index.display(&mut out, style).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn sorted_style_lists_pairs_in_key_order() {
        let mut index = sample_index();
        let text = render(&mut index, DisplayStyle::SortedKeyValue);

        assert_eq!(text, "(aaaa,1111)\n(bbbb,2222)\n(cccc,3333)\n");
    }

    #[test]
    fn depth_first_style_starts_at_the_root() {
        let mut index = sample_index();
        let text = render(&mut index, DisplayStyle::DepthFirst);

        let first_line = text.lines().next().unwrap();
        assert!(first_line.starts_with("1: root"));
        assert!(text.contains("leaf"));
        assert!(text.contains("(bbbb,2222)"));
    }

    #[test]
    fn dot_style_is_a_digraph_with_edges() {
        let mut index = sample_index();
        let text = render(&mut index, DisplayStyle::Dot);

        assert!(text.starts_with("digraph index {\n"));
        assert!(text.ends_with("}\n"));
        assert!(text.contains("->"));
        assert!(text.contains("label=\"1: root"));
    }

    #[test]
    fn empty_tree_renders_without_children() {
        let cache = MemoryCache::new(128, 8).unwrap();
        let mut index = BTreeIndex::create(cache, 4, 4).unwrap();

        assert_eq!(render(&mut index, DisplayStyle::SortedKeyValue), "");
        let text = render(&mut index, DisplayStyle::DepthFirst);
        assert_eq!(text, "1: root (empty)\n");
    }
}

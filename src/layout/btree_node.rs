//! Fixed-radix B-Tree node layout (spec §3/§6): 8-element internal or
//! 8-element leaf nodes, a parent offset, a type tag, and an aggregate
//! `mirror_tid`. Grounded on `original_source/hammer_btree.c` node shapes.

use bytemuck::{Pod, Zeroable};

use crate::layout::base_element::{BaseElement, Tid};
use crate::layout::crc::{crc32, verify};

/// Children per internal node (spec §4.4: "Radix is fixed (reference:
/// INT_ELMS=count, LEAF_ELMS=count)").
pub const INT_ELMS: usize = 8;
/// Records per leaf node.
pub const LEAF_ELMS: usize = 8;

/// An internal node boundary: a base key, the offset of the subtree it
/// brackets, that subtree's aggregate mirror_tid, and the subtree root's
/// node type (so descent doesn't need an extra read to know what it's
/// about to lock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct InternalElement {
    pub base: BaseElement,
    pub subtree_offset: u64,
    pub mirror_tid: Tid,
    pub btype: u8,
    pub _reserved: [u8; 7],
}

impl InternalElement {
    pub const ZERO: InternalElement = InternalElement {
        base: BaseElement::ZERO,
        subtree_offset: 0,
        mirror_tid: 0,
        btype: 0,
        _reserved: [0; 7],
    };
}

/// A leaf record: a base key plus a pointer to its data (spec §3: "base-key +
/// data_offset + data_len + data_crc").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct LeafElement {
    pub base: BaseElement,
    pub data_offset: u64,
    pub data_len: u32,
    pub data_crc: u32,
}

impl LeafElement {
    pub const ZERO: LeafElement = LeafElement {
        base: BaseElement::ZERO,
        data_offset: 0,
        data_len: 0,
        data_crc: 0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
}

/// In-memory node body. Internal nodes carry `count + 1` boundary elements
/// (left-inclusive, right-exclusive, per spec §3 invariants); leaf nodes
/// carry exactly `count` elements and no boundary slot.
#[derive(Debug, Clone)]
pub enum NodeBody {
    Internal(Vec<InternalElement>),
    Leaf(Vec<LeafElement>),
}

#[derive(Debug, Clone)]
pub struct BtreeNode {
    pub parent_offset: u64,
    /// Aggregate mirror_tid for this node's subtree (spec §3 invariant:
    /// "Every node's mirror_tid is >= max(create_tid, delete_tid) of every
    /// element in its subtree").
    pub mirror_tid: Tid,
    pub body: NodeBody,
}

impl BtreeNode {
    pub fn new_internal(parent_offset: u64) -> Self {
        BtreeNode {
            parent_offset,
            mirror_tid: 0,
            body: NodeBody::Internal(Vec::with_capacity(INT_ELMS + 1)),
        }
    }

    pub fn new_leaf(parent_offset: u64) -> Self {
        BtreeNode {
            parent_offset,
            mirror_tid: 0,
            body: NodeBody::Leaf(Vec::with_capacity(LEAF_ELMS)),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match &self.body {
            NodeBody::Internal(_) => NodeType::Internal,
            NodeBody::Leaf(_) => NodeType::Leaf,
        }
    }

    /// Number of "real" elements: boundary count minus one for internal
    /// nodes (the rightmost boundary has `subtree_offset == 0` and brackets
    /// nothing), or the leaf element count directly.
    pub fn count(&self) -> usize {
        match &self.body {
            NodeBody::Internal(v) => v.len().saturating_sub(1),
            NodeBody::Leaf(v) => v.len(),
        }
    }

    pub fn is_full(&self) -> bool {
        match self.node_type() {
            NodeType::Internal => self.count() >= INT_ELMS,
            NodeType::Leaf => self.count() >= LEAF_ELMS,
        }
    }

    pub fn internal_elements(&self) -> &[InternalElement] {
        match &self.body {
            NodeBody::Internal(v) => v,
            NodeBody::Leaf(_) => panic!("not an internal node"),
        }
    }

    pub fn internal_elements_mut(&mut self) -> &mut Vec<InternalElement> {
        match &mut self.body {
            NodeBody::Internal(v) => v,
            NodeBody::Leaf(_) => panic!("not an internal node"),
        }
    }

    pub fn leaf_elements(&self) -> &[LeafElement] {
        match &self.body {
            NodeBody::Leaf(v) => v,
            NodeBody::Internal(_) => panic!("not a leaf node"),
        }
    }

    pub fn leaf_elements_mut(&mut self) -> &mut Vec<LeafElement> {
        match &mut self.body {
            NodeBody::Leaf(v) => v,
            NodeBody::Internal(_) => panic!("not a leaf node"),
        }
    }

    /// Checks the strictly-increasing boundary invariant (spec §3/§8).
    pub fn boundaries_strictly_increasing(&self) -> bool {
        match &self.body {
            NodeBody::Internal(v) => v
                .windows(2)
                .all(|w| crate::btree::comparator::cmp(&w[0].base, &w[1].base) == std::cmp::Ordering::Less),
            NodeBody::Leaf(v) => v
                .windows(2)
                .all(|w| crate::btree::comparator::cmp(&w[0].base, &w[1].base) == std::cmp::Ordering::Less),
        }
    }

    /// Fixed-size on-disk encoding used for CRC purposes and persistence.
    pub fn to_raw(&self) -> BtreeNodeRaw {
        let mut raw = BtreeNodeRaw {
            parent_offset: self.parent_offset,
            node_type: match self.node_type() {
                NodeType::Internal => 0,
                NodeType::Leaf => 1,
            },
            count: self.count() as u8,
            _pad: [0; 6],
            mirror_tid: self.mirror_tid,
            internal: [InternalElement::ZERO; INT_ELMS + 1],
            leaf: [LeafElement::ZERO; LEAF_ELMS],
            crc: 0,
        };
        match &self.body {
            NodeBody::Internal(v) => {
                for (i, e) in v.iter().enumerate() {
                    raw.internal[i] = *e;
                }
            }
            NodeBody::Leaf(v) => {
                for (i, e) in v.iter().enumerate() {
                    raw.leaf[i] = *e;
                }
            }
        }
        raw.crc = crc32(bytemuck::bytes_of(&raw));
        raw
    }

    pub fn from_raw(raw: &BtreeNodeRaw) -> crate::error::Result<Self> {
        let mut zeroed = *raw;
        let stored = zeroed.crc;
        zeroed.crc = 0;
        verify(stored, crc32(bytemuck::bytes_of(&zeroed)))?;

        let body = match raw.node_type {
            0 => NodeBody::Internal(raw.internal[..raw.count as usize + 1].to_vec()),
            1 => NodeBody::Leaf(raw.leaf[..raw.count as usize].to_vec()),
            other => {
                return Err(crate::error::HammerError::InvariantViolation {
                    detail: format!("bad node type tag {other}"),
                })
            }
        };
        Ok(BtreeNode {
            parent_offset: raw.parent_offset,
            mirror_tid: raw.mirror_tid,
            body,
        })
    }
}

#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct BtreeNodeRaw {
    pub parent_offset: u64,
    pub node_type: u8,
    pub count: u8,
    pub _pad: [u8; 6],
    pub mirror_tid: Tid,
    pub internal: [InternalElement; INT_ELMS + 1],
    pub leaf: [LeafElement; LEAF_ELMS],
    pub crc: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_round_trips() {
        let mut node = BtreeNode::new_leaf(0);
        node.leaf_elements_mut().push(LeafElement {
            base: BaseElement::live(0, 1, 0, 1, 10),
            data_offset: 100,
            data_len: 4,
            data_crc: 0xdead,
        });
        node.mirror_tid = 10;

        let raw = node.to_raw();
        let restored = BtreeNode::from_raw(&raw).unwrap();
        assert_eq!(restored.count(), 1);
        assert_eq!(restored.leaf_elements()[0].data_offset, 100);
    }

    #[test]
    fn internal_rightmost_boundary_has_no_subtree() {
        let mut node = BtreeNode::new_internal(0);
        node.internal_elements_mut().push(InternalElement {
            base: BaseElement::live(0, 1, 0, 1, 10),
            subtree_offset: 0x1000,
            mirror_tid: 10,
            btype: 1,
            _reserved: [0; 7],
        });
        node.internal_elements_mut().push(InternalElement {
            base: BaseElement::live(0, 2, 0, 1, 10),
            subtree_offset: 0, // rightmost boundary: no subtree
            mirror_tid: 0,
            btype: 0,
            _reserved: [0; 7],
        });
        assert_eq!(node.count(), 1);
        assert!(node.boundaries_strictly_increasing());
        let raw = node.to_raw();
        let restored = BtreeNode::from_raw(&raw).unwrap();
        assert_eq!(restored.internal_elements()[1].subtree_offset, 0);
    }
}

//! Seed scenarios 2 and 6 (spec §8): leaf-split leaf counts once a tree
//! outgrows a single leaf, and the bottom-up rebalance packer collapsing an
//! artificially sparse tree back down.

use hammer_core::btree::node_store::{InMemoryNodeStore, NodeStore};
use hammer_core::btree::tree::BTree;
use hammer_core::layout::base_element::BaseElement;
use hammer_core::layout::btree_node::{LeafElement, NodeBody, NodeType, INT_ELMS, LEAF_ELMS};

fn count_leaves<S: NodeStore>(tree: &BTree<S>) -> (usize, NodeType) {
    let root_off = tree.root_offset().expect("tree has a root after any insert");
    let root = tree.store().load(root_off).unwrap();
    let root_type = match &root.body {
        NodeBody::Leaf(_) => NodeType::Leaf,
        NodeBody::Internal(_) => NodeType::Internal,
    };

    fn walk<S: NodeStore>(tree: &BTree<S>, offset: u64, leaves: &mut usize) {
        let node = tree.store().load(offset).unwrap();
        match &node.body {
            NodeBody::Leaf(_) => *leaves += 1,
            NodeBody::Internal(elems) => {
                for elem in elems {
                    walk(tree, elem.subtree_offset, leaves);
                }
            }
        }
    }

    let mut leaves = 0;
    walk(tree, root_off, &mut leaves);
    (leaves, root_type)
}

#[test]
fn splitting_past_one_leaf_promotes_the_root_to_internal() {
    let tree = BTree::new(InMemoryNodeStore::new());
    let n = (LEAF_ELMS * 5 + 3) as u64;
    for i in 0..n {
        tree.insert(LeafElement {
            base: BaseElement::live(0, i, 0, i, 100),
            data_offset: i,
            data_len: 0,
            data_crc: 0,
        })
        .unwrap();
    }

    let (leaves, root_type) = count_leaves(&tree);
    assert_eq!(leaves, n.div_ceil(LEAF_ELMS as u64) as usize);
    assert_eq!(root_type, NodeType::Internal);

    for i in 0..n {
        let found = tree.lookup(&BaseElement::live(0, i, 0, i, 0), None).unwrap();
        assert_eq!(found.base.obj_id, i);
    }
}

#[test]
fn a_single_insert_leaves_the_root_as_a_leaf() {
    let tree = BTree::new(InMemoryNodeStore::new());
    tree.insert(LeafElement {
        base: BaseElement::live(0, 1, 0, 1, 1),
        data_offset: 0,
        data_len: 0,
        data_crc: 0,
    })
    .unwrap();
    let (leaves, root_type) = count_leaves(&tree);
    assert_eq!(leaves, 1);
    assert_eq!(root_type, NodeType::Leaf);
}

#[test]
fn rebalance_at_int_elms_saturation_collapses_a_sparse_tree() {
    let tree = BTree::new(InMemoryNodeStore::new());
    let n = (INT_ELMS * 40) as u64;
    for i in 0..n {
        tree.insert(LeafElement {
            base: BaseElement::live(0, i, 0, i, 1),
            data_offset: i,
            data_len: 0,
            data_crc: 0,
        })
        .unwrap();
    }

    let freed = tree.rebalance(INT_ELMS).unwrap();
    assert!(freed > 0, "a tree built one leaf at a time has splitting slack to reclaim");

    for i in 0..n {
        let found = tree.lookup(&BaseElement::live(0, i, 0, i, 0), None).unwrap();
        assert_eq!(found.base.obj_id, i);
    }
}

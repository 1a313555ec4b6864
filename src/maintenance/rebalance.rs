//! Maintenance-facing rebalance driver (spec §4.8: "bottom-up pack; see
//! §4.4"). The packer itself lives on [`BTree::rebalance`]; this module
//! just gives the maintenance/ioctl surface its own grounded entry point and
//! report type, the way `original_source/hammer_rebalance.c` is a thin
//! driver around the same packing primitive the B-Tree split code shares.

use crate::btree::node_store::NodeStore;
use crate::btree::tree::BTree;
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceReport {
    pub nodes_freed: usize,
}

/// Runs one bottom-up rebalance pass at `saturation` (spec §8 scenario 6:
/// "saturation=INT_ELMS collapses to ceil(N/INT_ELMS) internals").
pub fn rebalance<S: NodeStore>(tree: &BTree<S>, saturation: usize) -> Result<RebalanceReport> {
    let nodes_freed = tree.rebalance(saturation)?;
    Ok(RebalanceReport { nodes_freed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::node_store::InMemoryNodeStore;
    use crate::layout::base_element::BaseElement;
    use crate::layout::btree_node::{LeafElement, LEAF_ELMS};

    #[test]
    fn drives_the_shared_packer_and_reports_freed_nodes() {
        let tree = BTree::new(InMemoryNodeStore::new());
        for i in 0..32u64 {
            tree.insert(LeafElement {
                base: BaseElement::live(0, i, 0, i, 1),
                data_offset: i,
                data_len: 0,
                data_crc: 0,
            })
            .unwrap();
        }
        let report = rebalance(&tree, LEAF_ELMS).unwrap();
        assert!(report.nodes_freed > 0);
    }
}

//! Historical-record pruning (spec §4.8): reverse-iterate a key range and
//! delete any `delete_tid != 0` record that falls entirely inside a
//! caller-supplied retention bucket, aligning the create/delete TIDs of
//! surviving historical records up to the bucket's granularity. Grounded on
//! `original_source/hammer_prune.c`.
//!
//! Boundary-correction propagation (`correct_rhb`/`correct_lhb` in the
//! original) is intentionally not reproduced — SPEC_FULL.md records this as
//! a resolved open question, and DESIGN.md explains why.

use tracing::debug;

use crate::btree::node_store::NodeStore;
use crate::btree::tree::BTree;
use crate::error::Result;
use crate::layout::base_element::{BaseElement, Tid};

/// A single retention rule: historical records whose `delete_tid` falls in
/// `[beg_tid, end_tid]` are collapsed onto `mod_tid`-sized buckets (spec
/// §4.8: "both versions fall inside the same retention bucket").
#[derive(Debug, Clone, Copy)]
pub struct PrunePolicy {
    pub beg_tid: Tid,
    pub end_tid: Tid,
    pub mod_tid: Tid,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    pub deleted: usize,
    pub aligned: usize,
}

fn bucket(tid: Tid, mod_tid: Tid) -> Tid {
    if mod_tid == 0 {
        tid
    } else {
        tid / mod_tid
    }
}

fn round_up_to_mod(tid: Tid, mod_tid: Tid) -> Tid {
    if mod_tid <= 1 {
        tid
    } else {
        tid.div_ceil(mod_tid) * mod_tid
    }
}

fn matching_policy(policies: &[PrunePolicy], delete_tid: Tid) -> Option<&PrunePolicy> {
    policies.iter().find(|p| delete_tid >= p.beg_tid && delete_tid <= p.end_tid)
}

/// Prunes `[key_beg, key_end]` under `policies`, reverse-iterating so
/// alignment of one record's TIDs never overlaps one already visited (spec
/// §4.8: "reverse iteration is mandatory").
pub fn prune<S: NodeStore>(tree: &BTree<S>, key_beg: &BaseElement, key_end: &BaseElement, policies: &[PrunePolicy]) -> Result<PruneStats> {
    let mut stats = PruneStats::default();
    let elements = tree.iterate_all(key_beg, key_end, true, true)?;

    for elem in elements {
        if !elem.base.is_historical() {
            continue;
        }
        let Some(policy) = matching_policy(policies, elem.base.delete_tid) else {
            continue;
        };

        if bucket(elem.base.create_tid, policy.mod_tid) == bucket(elem.base.delete_tid, policy.mod_tid) {
            tree.delete(&elem.base)?;
            stats.deleted += 1;
            continue;
        }

        let aligned_create = round_up_to_mod(elem.base.create_tid, policy.mod_tid);
        let aligned_delete = round_up_to_mod(elem.base.delete_tid, policy.mod_tid).max(aligned_create + 1);
        if aligned_create == elem.base.create_tid && aligned_delete == elem.base.delete_tid {
            continue;
        }

        let mut aligned = elem;
        aligned.base.create_tid = aligned_create;
        aligned.base.delete_tid = aligned_delete;
        tree.delete(&elem.base)?;
        if tree.insert(aligned).is_ok() {
            stats.aligned += 1;
        } else {
            debug!(obj_id = elem.base.obj_id, "prune alignment collided with an existing version, leaving unaligned");
            tree.insert(elem)?;
        }
    }
    Ok(stats)
}

//! External control surface (spec §6): the ioctl-shaped entry points a VFS
//! glue layer (explicitly out of scope, §1) would wire up to file-descriptor
//! ioctl numbers. Grounded on `original_source/hammer_ioctl.c`'s argument
//! structs, translated into a typed request/response enum pair instead of a
//! raw `ioctl(2)` number + `void *` argument block.
//!
//! Exit semantics follow spec §6/§7 exactly: `Ok` on success; `EDEADLK` is
//! retried internally exactly once before surfacing (spec §7: "local retry
//! is attempted exactly once for EDEADLK at each layer... ioctl"); every
//! other error propagates to the caller as-is, and `HammerError::errno()`
//! gives the POSIX-flavored exit code a C-style caller would expect.

use crate::blockmap::{SpaceCheckSizing, SpaceRequest};
use crate::btree::tree::MirrorFilteredResult;
use crate::error::{HammerError, Result};
use crate::layout::base_element::{BaseElement, Tid};
use crate::layout::btree_node::LeafElement;
use crate::layout::zone::Zone;
use crate::maintenance::{PrunePolicy, PruneStats, RebalanceReport, ReblockStats};
use crate::mount::{Mount, Transaction};

/// One request across the control surface (spec §6's bulleted ioctl list).
pub enum IoctlRequest<'a> {
    Prune {
        key_beg: BaseElement,
        key_end: BaseElement,
        policies: &'a [PrunePolicy],
    },
    Reblock {
        key_beg: BaseElement,
        key_end: BaseElement,
        zone: Zone,
        free_level: Option<i64>,
    },
    Rebalance {
        saturation: usize,
    },
    MirrorRead {
        key_beg: BaseElement,
        key_end: BaseElement,
        mirror_tid: Tid,
    },
    MirrorWrite {
        trans: Transaction,
        elements: Vec<LeafElement>,
    },
    Snapshot,
    GetHistory {
        key: BaseElement,
        asof_beg: Tid,
        asof_end: Tid,
    },
    SpaceCheck {
        request: SpaceRequest,
        sizing: SpaceCheckSizing,
    },
}

/// The response matching each [`IoctlRequest`] variant.
pub enum IoctlResponse {
    Prune(PruneStats),
    Reblock(ReblockStats),
    Rebalance(RebalanceReport),
    MirrorRead(MirrorFilteredResult),
    MirrorWrite { applied: usize },
    Snapshot { tid: Tid },
    GetHistory(Vec<LeafElement>),
    SpaceCheck { ok: bool },
}

/// Validates the argument shape spec §6 rejects with `EINVAL` before
/// dispatching: an empty/inverted key range on any range-taking request.
fn validate(req: &IoctlRequest) -> Result<()> {
    let bad_range = |beg: &BaseElement, end: &BaseElement| crate::btree::comparator::cmp(beg, end) == std::cmp::Ordering::Greater;
    let invalid = match req {
        IoctlRequest::Prune { key_beg, key_end, .. } => bad_range(key_beg, key_end),
        IoctlRequest::Reblock { key_beg, key_end, .. } => bad_range(key_beg, key_end),
        IoctlRequest::MirrorRead { key_beg, key_end, .. } => bad_range(key_beg, key_end),
        IoctlRequest::Rebalance { saturation } => *saturation == 0,
        IoctlRequest::GetHistory { asof_beg, asof_end, .. } => asof_beg > asof_end,
        IoctlRequest::MirrorWrite { .. } | IoctlRequest::Snapshot | IoctlRequest::SpaceCheck { .. } => false,
    };
    if invalid {
        return Err(HammerError::InvalidArgument {
            detail: "ioctl argument block failed validation".to_string(),
        });
    }
    Ok(())
}

/// Dispatches `req` against `mount`, retrying exactly once on
/// [`HammerError::Deadlock`] (spec §7) before the error is allowed to
/// surface to the caller.
pub fn dispatch(mount: &Mount, req: IoctlRequest) -> Result<IoctlResponse> {
    validate(&req)?;
    match run_once(mount, &req) {
        Err(HammerError::Deadlock { node_offset }) => {
            tracing::debug!(node_offset, "ioctl retrying once after EDEADLK");
            run_once(mount, &req)
        }
        other => other,
    }
}

fn run_once(mount: &Mount, req: &IoctlRequest) -> Result<IoctlResponse> {
    match req {
        IoctlRequest::Prune { key_beg, key_end, policies } => mount.prune(key_beg, key_end, policies).map(IoctlResponse::Prune),
        IoctlRequest::Reblock { key_beg, key_end, zone, free_level } => {
            mount.reblock(key_beg, key_end, *zone, *free_level).map(IoctlResponse::Reblock)
        }
        IoctlRequest::Rebalance { saturation } => mount.rebalance(*saturation).map(IoctlResponse::Rebalance),
        IoctlRequest::MirrorRead { key_beg, key_end, mirror_tid } => mount.mirror_read(key_beg, key_end, *mirror_tid).map(IoctlResponse::MirrorRead),
        IoctlRequest::MirrorWrite { trans, elements } => mount.mirror_write(trans, elements.clone()).map(|applied| IoctlResponse::MirrorWrite { applied }),
        IoctlRequest::Snapshot => Ok(IoctlResponse::Snapshot { tid: mount.snapshot() }),
        IoctlRequest::GetHistory { key, asof_beg, asof_end } => mount.get_history(key, *asof_beg, *asof_end).map(IoctlResponse::GetHistory),
        IoctlRequest::SpaceCheck { request, sizing } => Ok(IoctlResponse::SpaceCheck { ok: mount.space_check(request, sizing) }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountConfig;
    use crate::io::device::InMemoryDevice;
    use crate::layout::{BIGBLOCK_SIZE, BUFFER_SIZE};
    use crate::mount::TransactionKind;
    use std::sync::Arc;

    fn fresh_mount() -> Mount {
        let device = Arc::new(InMemoryDevice::new(64 * BIGBLOCK_SIZE));
        Mount::mkfs(device, 0, MountConfig::builder().flusher_worker_count(1).build().unwrap()).unwrap()
    }

    #[test]
    fn rejects_inverted_key_range_with_invalid_argument() {
        let mount = fresh_mount();
        let req = IoctlRequest::Prune {
            key_beg: BaseElement::live(0, 10, 0, 10, 0),
            key_end: BaseElement::live(0, 1, 0, 1, 0),
            policies: &[],
        };
        let err = dispatch(&mount, req).unwrap_err();
        assert!(matches!(err, HammerError::InvalidArgument { .. }));
    }

    #[test]
    fn rebalance_rejects_zero_saturation() {
        let mount = fresh_mount();
        let err = dispatch(&mount, IoctlRequest::Rebalance { saturation: 0 }).unwrap_err();
        assert!(matches!(err, HammerError::InvalidArgument { .. }));
    }

    #[test]
    fn snapshot_reports_a_tid_under_the_next_allocation() {
        let mount = fresh_mount();
        let txn = mount.begin_transaction(TransactionKind::Frontend).unwrap();
        mount.end_transaction(txn);
        match dispatch(&mount, IoctlRequest::Snapshot).unwrap() {
            IoctlResponse::Snapshot { tid } => assert!(tid < txn.tid + 1),
            _ => panic!("expected Snapshot response"),
        }
    }

    #[test]
    fn get_history_returns_every_version_in_the_asof_window() {
        let mount = fresh_mount();
        let key = BaseElement::live(0, 7, 0, 7, 0);
        mount
            .insert(LeafElement {
                base: BaseElement {
                    create_tid: 10,
                    delete_tid: 20,
                    ..key
                },
                data_offset: 0,
                data_len: 0,
                data_crc: 0,
            })
            .unwrap();
        mount
            .insert(LeafElement {
                base: BaseElement {
                    create_tid: 20,
                    delete_tid: 0,
                    ..key
                },
                data_offset: 0,
                data_len: 0,
                data_crc: 0,
            })
            .unwrap();

        let req = IoctlRequest::GetHistory {
            key,
            asof_beg: 0,
            asof_end: 100,
        };
        match dispatch(&mount, req).unwrap() {
            IoctlResponse::GetHistory(versions) => assert_eq!(versions.len(), 2),
            _ => panic!("expected GetHistory response"),
        }
    }

    #[test]
    fn space_check_reports_ok_for_a_tiny_request_on_a_fresh_mount() {
        let mount = fresh_mount();
        let req = IoctlRequest::SpaceCheck {
            request: SpaceRequest::default(),
            sizing: SpaceCheckSizing::default(),
        };
        match dispatch(&mount, req).unwrap() {
            IoctlResponse::SpaceCheck { ok } => assert!(ok),
            _ => panic!("expected SpaceCheck response"),
        }
    }
}

//! Seed scenarios 4 and 5 (spec §8): prune collapsing historical records
//! onto retention buckets, and reblock relocating data off a sparse big
//! block.

use std::sync::Arc;

use hammer_core::config::MountConfig;
use hammer_core::io::device::InMemoryDevice;
use hammer_core::layout::base_element::{BaseElement, TID_MAX};
use hammer_core::layout::btree_node::LeafElement;
use hammer_core::layout::zone::Zone;
use hammer_core::layout::BIGBLOCK_SIZE;
use hammer_core::maintenance::PrunePolicy;
use hammer_core::mount::TransactionKind;
use hammer_core::Mount;

fn fresh_mount(bigblocks: u64) -> Mount {
    let device = Arc::new(InMemoryDevice::new(bigblocks * BIGBLOCK_SIZE));
    Mount::mkfs(device, 0, MountConfig::builder().flusher_worker_count(1).build().unwrap()).unwrap()
}

#[test]
fn prune_drops_same_bucket_history_and_aligns_the_rest_to_the_retention_bucket() {
    let mount = fresh_mount(16);

    // create_tid and delete_tid fall in the same 1_000_000-wide bucket:
    // pruning should drop this version outright (spec §8 scenario 4).
    let same_bucket = BaseElement { create_tid: 1_200_000, delete_tid: 1_500_000, ..BaseElement::live(0, 42, 0, 42, 0) };
    mount
        .insert(LeafElement { base: same_bucket, data_offset: 0, data_len: 0, data_crc: 0 })
        .unwrap();

    // Spans two buckets: should survive, with its TIDs rounded up to the
    // bucket boundary rather than deleted.
    let cross_bucket = BaseElement { create_tid: 1_200_000, delete_tid: 2_500_000, ..BaseElement::live(0, 43, 0, 43, 0) };
    mount
        .insert(LeafElement { base: cross_bucket, data_offset: 0, data_len: 0, data_crc: 0 })
        .unwrap();

    let policy = PrunePolicy { beg_tid: 0, end_tid: TID_MAX, mod_tid: 1_000_000 };
    let key_beg = BaseElement::live(0, 0, 0, 0, 0);
    let key_end = BaseElement::live(0, 100, 0, 100, 0);
    let stats = mount.prune(&key_beg, &key_end, &[policy]).unwrap();
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.aligned, 1);

    assert!(mount.lookup(&BaseElement::live(0, 42, 0, 42, 0), Some(1_300_000)).is_err());

    let survivor = mount.lookup(&BaseElement::live(0, 43, 0, 43, 0), Some(2_000_000)).unwrap();
    assert_eq!(survivor.base.create_tid % 1_000_000, 0);
    assert_eq!(survivor.base.delete_tid % 1_000_000, 0);
}

#[test]
fn reblock_relocates_data_off_a_big_block_above_the_free_level() {
    let mount = fresh_mount(16);
    let txn = mount.begin_transaction(TransactionKind::Frontend).unwrap();

    // `alloc_data`'s length only has to match what the scenario's big block
    // accounting needs (3 MiB "used" out of 8 MiB); the actual record
    // written and relocated is much smaller and lives at the front of that
    // span.
    let payload = b"relocate me";
    let (offset, handle) = mount.alloc_data(&txn, 3 * 1024 * 1024, Zone::SmallData).unwrap();
    mount.buffers().modify(&handle).unwrap();
    mount.buffers().write_region(&handle, 0, payload).unwrap();
    mount.buffers().modify_done(&handle);
    mount.buffers().release(handle, false).unwrap();
    mount.end_transaction(txn);

    let crc = hammer_core::layout::crc::crc32(payload);
    let key = BaseElement::live(0, 1, 0, 1, 10);
    mount
        .insert(LeafElement {
            base: key,
            data_offset: offset,
            data_len: payload.len() as u32,
            data_crc: crc,
        })
        .unwrap();

    let free_level = (BIGBLOCK_SIZE / 2) as i64;
    let stats = mount.reblock(&key, &key, Zone::SmallData, Some(free_level)).unwrap();
    assert_eq!(stats.relocated, 1);

    let relocated = mount.lookup(&key, Some(TID_MAX)).unwrap();
    assert_ne!(relocated.data_offset, offset);
    assert_eq!(relocated.data_crc, crc);
}

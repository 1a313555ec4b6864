//! Seed scenario 3 (spec §8): crash injection. Two [`Mount`] instances share
//! one [`InMemoryDevice`] so dropping the first without a clean `unmount`
//! stands in for a process getting SIGKILL'd — nothing explicitly flushed
//! survives, but everything `sync`'d does, and a remount sees it.

use std::sync::Arc;

use hammer_core::config::MountConfig;
use hammer_core::io::device::InMemoryDevice;
use hammer_core::layout::base_element::{BaseElement, TID_MAX};
use hammer_core::layout::btree_node::LeafElement;
use hammer_core::layout::BIGBLOCK_SIZE;
use hammer_core::Mount;

fn config() -> MountConfig {
    MountConfig::builder().flusher_worker_count(1).build().unwrap()
}

fn elem(key: u64, create_tid: u64) -> LeafElement {
    LeafElement {
        base: BaseElement::live(0, key, 0, key, create_tid),
        data_offset: 0,
        data_len: 0,
        data_crc: 0,
    }
}

#[test]
fn a_synced_mount_survives_remount() {
    let device: Arc<dyn hammer_core::io::device::BlockDevice> = Arc::new(InMemoryDevice::new(64 * BIGBLOCK_SIZE));

    {
        let mount = Mount::mkfs(device.clone(), 0, config()).unwrap();
        for key in 0..1_000u64 {
            mount.insert(elem(key, 100)).unwrap();
        }
        mount.sync().expect("sync should commit the flush group");
        // Dropped here without calling unmount — the crash-injection point.
    }

    let remounted = Mount::open_existing(device, config(), true).expect("remount should recover a consistent volume");
    for key in 0..1_000u64 {
        let found = remounted.lookup(&BaseElement::live(0, key, 0, key, 0), Some(TID_MAX)).unwrap();
        assert_eq!(found.base.obj_id, key);
    }
}

#[test]
fn inserts_made_after_the_last_sync_do_not_survive_a_crash() {
    let device: Arc<dyn hammer_core::io::device::BlockDevice> = Arc::new(InMemoryDevice::new(64 * BIGBLOCK_SIZE));

    {
        let mount = Mount::mkfs(device.clone(), 0, config()).unwrap();
        for key in 0..500u64 {
            mount.insert(elem(key, 100)).unwrap();
        }
        mount.sync().unwrap();

        // Never synced past this point.
        for key in 500..600u64 {
            mount.insert(elem(key, 200)).unwrap();
        }
    }

    let remounted = Mount::open_existing(device, config(), true).unwrap();
    for key in 0..500u64 {
        assert!(remounted.lookup(&BaseElement::live(0, key, 0, key, 0), Some(TID_MAX)).is_ok());
    }
    for key in 500..600u64 {
        assert!(remounted.lookup(&BaseElement::live(0, key, 0, key, 0), Some(TID_MAX)).is_err());
    }
}

#[test]
fn a_fresh_mkfs_with_no_inserts_reopens_to_an_empty_tree() {
    let device: Arc<dyn hammer_core::io::device::BlockDevice> = Arc::new(InMemoryDevice::new(8 * BIGBLOCK_SIZE));
    {
        let mount = Mount::mkfs(device.clone(), 0, config()).unwrap();
        mount.sync().unwrap();
    }
    let remounted = Mount::open_existing(device, config(), true).unwrap();
    assert!(remounted.lookup(&BaseElement::live(0, 1, 0, 1, 0), Some(TID_MAX)).is_err());
}

#[test]
fn inserting_after_remount_does_not_overwrite_recovered_btree_content() {
    let device: Arc<dyn hammer_core::io::device::BlockDevice> = Arc::new(InMemoryDevice::new(64 * BIGBLOCK_SIZE));

    {
        let mount = Mount::mkfs(device.clone(), 0, config()).unwrap();
        for key in 0..500u64 {
            mount.insert(elem(key, 100)).unwrap();
        }
        mount.sync().expect("sync should commit the flush group");
    }

    // If the reopened freemap still believed every big block was free, these
    // inserts (enough to force fresh big-block allocations) could land on
    // the very blocks holding the B-Tree nodes recovered above and corrupt
    // them.
    let remounted = Mount::open_existing(device, config(), true).expect("remount should recover a consistent volume");
    for key in 500..1_500u64 {
        remounted.insert(elem(key, 200)).unwrap();
    }

    for key in 0..500u64 {
        let found = remounted.lookup(&BaseElement::live(0, key, 0, key, 0), Some(TID_MAX)).unwrap();
        assert_eq!(found.base.obj_id, key);
    }
    for key in 500..1_500u64 {
        let found = remounted.lookup(&BaseElement::live(0, key, 0, key, 0), Some(TID_MAX)).unwrap();
        assert_eq!(found.base.obj_id, key);
    }
}

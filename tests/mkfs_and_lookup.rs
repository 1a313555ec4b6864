//! Seed scenario 1 (spec §8): mkfs on a fresh volume, insert a batch of
//! records sharing one create_tid, then confirm as-of visibility at both
//! sides of that TID.

use std::sync::Arc;

use hammer_core::config::MountConfig;
use hammer_core::io::device::InMemoryDevice;
use hammer_core::layout::base_element::{BaseElement, TID_MAX};
use hammer_core::layout::btree_node::LeafElement;
use hammer_core::layout::BIGBLOCK_SIZE;
use hammer_core::Mount;

fn fresh_mount(bigblocks: u64) -> Mount {
    let device = Arc::new(InMemoryDevice::new(bigblocks * BIGBLOCK_SIZE));
    let config = MountConfig::builder().flusher_worker_count(1).build().unwrap();
    Mount::mkfs(device, 0, config).unwrap()
}

#[test]
fn ten_thousand_records_are_visible_only_at_or_after_their_create_tid() {
    let mount = fresh_mount(100);

    for key in 0..10_000u64 {
        mount
            .insert(LeafElement {
                base: BaseElement::live(0, key, 0, key, 100),
                data_offset: 0,
                data_len: 0,
                data_crc: 0,
            })
            .unwrap();
    }

    let probe = BaseElement::live(0, 5000, 0, 5000, 0);
    let found = mount.lookup(&probe, Some(TID_MAX)).unwrap();
    assert_eq!(found.base.obj_id, 5000);
    assert_eq!(found.base.create_tid, 100);

    let err = mount.lookup(&probe, Some(50)).unwrap_err();
    assert!(matches!(err, hammer_core::HammerError::NotFound));
}

#[test]
fn a_historical_version_is_visible_only_inside_its_create_delete_bracket() {
    let mount = fresh_mount(16);
    let key = BaseElement::live(0, 1, 0, 1, 0);
    mount
        .insert(LeafElement {
            base: BaseElement { create_tid: 10, delete_tid: 20, ..key },
            data_offset: 0,
            data_len: 0,
            data_crc: 0,
        })
        .unwrap();

    let probe = BaseElement::live(0, 1, 0, 1, 0);
    let visible = mount.lookup(&probe, Some(15)).unwrap();
    assert_eq!(visible.base.create_tid, 10);

    assert!(mount.lookup(&probe, Some(25)).is_err());
    assert!(mount.lookup(&probe, Some(5)).is_err());
}

#[test]
fn a_live_record_inserted_then_hard_deleted_is_gone() {
    let mount = fresh_mount(16);
    let key = BaseElement::live(0, 1, 0, 1, 10);
    mount
        .insert(LeafElement {
            base: key,
            data_offset: 0,
            data_len: 0,
            data_crc: 0,
        })
        .unwrap();
    mount.delete(&BaseElement::live(0, 1, 0, 1, 0)).unwrap();
    assert!(mount.lookup(&BaseElement::live(0, 1, 0, 1, 0), Some(TID_MAX)).is_err());
}

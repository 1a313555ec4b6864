//! Exercises the production [`FileDevice`] backend (rather than
//! [`InMemoryDevice`]) over a real file on disk, the way the teacher's own
//! integration tests stand up a real temp-directory-backed filesystem
//! instead of only the in-memory test double (`tempfile`/`temp-dir` in its
//! dev-dependencies). Also verifies a mount built on a real file survives
//! being dropped and reopened, the file-backed analogue of
//! `crash_recovery.rs`'s in-memory-device scenario.

use std::sync::Arc;

use hammer_core::config::MountConfig;
use hammer_core::io::device::{BlockDevice, FileDevice};
use hammer_core::layout::base_element::{BaseElement, TID_MAX};
use hammer_core::layout::btree_node::LeafElement;
use hammer_core::layout::BIGBLOCK_SIZE;
use hammer_core::Mount;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("hammer_core=trace").with_test_writer().try_init();
}

fn config() -> MountConfig {
    MountConfig::builder().flusher_worker_count(1).build().unwrap()
}

#[test]
fn a_file_backed_mount_round_trips_through_mkfs_and_lookup() {
    init_tracing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("hammer.img");

    let device: Arc<dyn BlockDevice> = Arc::new(FileDevice::create(&path, 32 * BIGBLOCK_SIZE).expect("create backing file"));
    let mount = Mount::mkfs(device, 0, config()).unwrap();

    for key in 0..256u64 {
        mount
            .insert(LeafElement {
                base: BaseElement::live(0, key, 0, key, 10),
                data_offset: 0,
                data_len: 0,
                data_crc: 0,
            })
            .unwrap();
    }

    for key in 0..256u64 {
        let found = mount.lookup(&BaseElement::live(0, key, 0, key, 0), Some(TID_MAX)).unwrap();
        assert_eq!(found.base.obj_id, key);
    }
}

#[test]
fn a_file_backed_mount_survives_close_and_reopen_after_sync() {
    init_tracing();
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("hammer.img");

    {
        let device: Arc<dyn BlockDevice> = Arc::new(FileDevice::create(&path, 32 * BIGBLOCK_SIZE).expect("create backing file"));
        let mount = Mount::mkfs(device, 0, config()).unwrap();
        for key in 0..128u64 {
            mount
                .insert(LeafElement {
                    base: BaseElement::live(0, key, 0, key, 10),
                    data_offset: 0,
                    data_len: 0,
                    data_crc: 0,
                })
                .unwrap();
        }
        mount.unmount(false).expect("clean unmount should flush everything");
    }

    // Reopen against the same path through a fresh `FileDevice` handle,
    // standing in for a new mount(2) call after the first process exited.
    let device: Arc<dyn BlockDevice> = Arc::new(FileDevice::open(&path).expect("reopen backing file"));
    let remounted = Mount::open_existing(device, config(), true).expect("remount should recover a consistent volume");
    for key in 0..128u64 {
        let found = remounted.lookup(&BaseElement::live(0, key, 0, key, 0), Some(TID_MAX)).unwrap();
        assert_eq!(found.base.obj_id, key);
    }
}

//! §8 scenario 1: log a data-page update delta, replay it against a fresh
//! page memory, and confirm the row materializes at the declared item_id
//! with a terminal-next pointer.

use gridstore_core::memory::PageMemory;
use gridstore_core::pageid::{PageFlag, PageId};
use gridstore_core::store::FilePageStore;
use gridstore_core::wal::record::{PayloadRef, RecordTag, WalRecord};
use gridstore_core::wal::WalManager;

use std::sync::Arc;
use tempfile::tempdir;

fn memory(dir: &std::path::Path, page_size: usize) -> PageMemory {
    let store = Arc::new(
        FilePageStore::open(dir.join("data-0.bin"), page_size, PageFlag::Data, 0, None).unwrap(),
    );
    let mut mem = PageMemory::new(page_size);
    mem.register_store(PageFlag::Data as u8, 0, store);
    mem
}

#[test]
fn data_page_update_delta_round_trips_through_wal_replay() {
    let dir = tempdir().unwrap();
    let wal = WalManager::open(dir.path(), 1 << 20).unwrap();
    let mem = memory(dir.path(), 256);

    let page_id = PageId::new(PageFlag::Data, 0, 7);
    let record = WalRecord::DataPageUpdate {
        group_id: 1,
        page_id,
        item_id: 3,
        payload: PayloadRef::Inline(vec![0x01, 0x02, 0x03]),
    };

    let ptr = wal.log(&record).unwrap();
    // a pointer returned by `log` is never itself terminal (it has a
    // nonzero length); `next()` derived from it is terminal only once its
    // length collapses to zero.
    let next = ptr.next();
    assert_eq!(next.record_length, 0);
    assert!(next.is_terminal());

    let frames = wal.replay(gridstore_core::pageid::WalPointer::new(0, 0, 0)).unwrap();
    assert_eq!(frames.len(), 1);
    let (_, tag, payload) = &frames[0];
    assert_eq!(*tag, RecordTag::DataPageUpdate);

    let decoded = WalRecord::decode(*tag, payload).unwrap();
    decoded.apply(&mem).unwrap();

    let mut out = vec![0u8; 256];
    mem.read(page_id, &mut out).unwrap();
    // a DataPage built fresh by apply() and re-read must show the same
    // bytes at item_id 3 that the delta carried.
    let page = gridstore_core::page::DataPage::from_bytes(page_id, out);
    assert_eq!(page.get(3), Some(&[0x01, 0x02, 0x03][..]));
}

#[test]
fn replay_from_middle_pointer_skips_earlier_records() {
    let dir = tempdir().unwrap();
    let wal = WalManager::open(dir.path(), 1 << 20).unwrap();

    let page_id = PageId::new(PageFlag::Data, 0, 1);
    let first = wal
        .log(&WalRecord::DataPageInsert {
            group_id: 1,
            page_id,
            item_id: 0,
            payload: PayloadRef::Inline(vec![0xAA]),
        })
        .unwrap();
    wal.log(&WalRecord::DataPageInsert {
        group_id: 1,
        page_id,
        item_id: 1,
        payload: PayloadRef::Inline(vec![0xBB]),
    })
    .unwrap();

    let frames = wal.replay(first.next()).unwrap();
    assert_eq!(frames.len(), 1);
    let decoded = WalRecord::decode(frames[0].1, &frames[0].2).unwrap();
    match decoded {
        WalRecord::DataPageInsert { item_id, .. } => assert_eq!(item_id, 1),
        other => panic!("unexpected record {:?}", other),
    }
}

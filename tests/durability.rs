//! Durability: tuples must survive flushes, cache drops, and full engine
//! restarts, and cache eviction under pressure must not lose writes.

use stordb::{DiskManager, FreeSpaceMap, PageManager, TupleId};
use tempfile::TempDir;

fn open_manager(dir: &TempDir) -> PageManager {
    let disk = DiskManager::open(dir.path().join("table.db")).unwrap();
    let fsm = FreeSpaceMap::open(dir.path().join("table.fsm")).unwrap();
    PageManager::new(disk, fsm)
}

fn payload(i: usize) -> Vec<u8> {
    // varied sizes so pages fill unevenly
    let len = 200 + (i % 5) * 150;
    let mut data = format!("tuple-{i}:").into_bytes();
    data.resize(len, (i % 251) as u8);
    data
}

#[test]
fn thousand_tuples_survive_cache_drop() {
    let dir = TempDir::new().unwrap();
    let pm = open_manager(&dir);

    let tids: Vec<TupleId> = (0..1000).map(|i| pm.insert_tuple(&payload(i)).unwrap()).collect();

    pm.flush_all_pages().unwrap();
    pm.clear_cache().unwrap();
    assert_eq!(pm.cache_size(), 0);

    let mut buf = vec![0u8; 2048];
    for (i, tid) in tids.iter().enumerate() {
        let len = pm.get_tuple(*tid, &mut buf).unwrap();
        assert_eq!(&buf[..len], payload(i).as_slice(), "tuple {i} mismatch");
    }
}

#[test]
fn tuples_survive_engine_restart() {
    let dir = TempDir::new().unwrap();

    let tids: Vec<TupleId> = {
        let pm = open_manager(&dir);
        let tids = (0..300).map(|i| pm.insert_tuple(&payload(i)).unwrap()).collect();
        pm.flush_all_pages().unwrap();
        tids
        // dropping the manager flushes again and closes the files
    };

    let pm = open_manager(&dir);
    let mut buf = vec![0u8; 2048];
    for (i, tid) in tids.iter().enumerate() {
        let len = pm.get_tuple(*tid, &mut buf).unwrap();
        assert_eq!(&buf[..len], payload(i).as_slice(), "tuple {i} mismatch");
    }
}

#[test]
fn eviction_under_cache_pressure_preserves_data() {
    let dir = TempDir::new().unwrap();
    let pm = open_manager(&dir);

    // ~8 tuples of 1000 bytes per page: 1000 tuples span well past the
    // 100-page cache, forcing flush-and-evict along the way
    let big_payload = |i: usize| {
        let mut data = format!("big-{i}:").into_bytes();
        data.resize(1000, (i % 199) as u8);
        data
    };

    let tids: Vec<TupleId> = (0..1000)
        .map(|i| pm.insert_tuple(&big_payload(i)).unwrap())
        .collect();
    assert!(pm.cache_size() <= 100);

    let mut buf = vec![0u8; 2048];
    for (i, tid) in tids.iter().enumerate() {
        let len = pm.get_tuple(*tid, &mut buf).unwrap();
        assert_eq!(&buf[..len], big_payload(i).as_slice(), "tuple {i} mismatch");
    }
}

#[test]
fn forwarded_tuples_survive_restart() {
    let dir = TempDir::new().unwrap();

    let (tid, grown) = {
        let pm = open_manager(&dir);
        let tid = pm.insert_tuple(b"tiny").unwrap();
        let grown = vec![b'Z'; 300];
        pm.update_tuple(tid, &grown).unwrap();
        pm.flush_all_pages().unwrap();
        (tid, grown)
    };

    let pm = open_manager(&dir);
    let mut buf = vec![0u8; 512];
    let len = pm.get_tuple(tid, &mut buf).unwrap();
    assert_eq!(&buf[..len], grown.as_slice());
}

#[test]
fn deleted_tuples_stay_deleted_after_restart() {
    let dir = TempDir::new().unwrap();

    let (kept, dropped) = {
        let pm = open_manager(&dir);
        let kept = pm.insert_tuple(b"keeper").unwrap();
        let dropped = pm.insert_tuple(b"goner").unwrap();
        pm.delete_tuple(dropped).unwrap();
        pm.flush_all_pages().unwrap();
        (kept, dropped)
    };

    let pm = open_manager(&dir);
    let mut buf = vec![0u8; 64];
    let len = pm.get_tuple(kept, &mut buf).unwrap();
    assert_eq!(&buf[..len], b"keeper");
    assert!(pm.get_tuple(dropped, &mut buf).is_err());
}

//! Transaction crash scenarios
//!
//! A crash anywhere before the commit flag leaves the pre-image after
//! recovery; a crash after it leaves the new state.

use crate::crash::harness::{
    assert_crashed, assert_passed, child_data_dir, run_child, Injection,
};
use crate::crash::utils::{
    assert_root_filled, create_temp_data_dir, open_root, seed_pool, CHILD_BYTE, ROOT_SIZE,
    SEED_BYTE,
};
use pmheap::crash_point::points;
use pmheap::{HeapErrorCode, TxParams};

/// Child workload: overwrite the root and commit.
fn overwrite_root_and_commit() {
    let dir = child_data_dir().expect("not a child");
    let (heap, root) = open_root(&dir);
    let mut tx = heap.begin(TxParams::NONE).unwrap();
    tx.write(&root, 0, &[CHILD_BYTE; ROOT_SIZE as usize]).unwrap();
    tx.commit().unwrap();
}

#[test]
fn test_crash_after_undo_append_restores_pre_image() {
    if child_data_dir().is_some() {
        overwrite_root_and_commit();
        panic!("crash point did not fire");
    }

    let temp = create_temp_data_dir();
    seed_pool(temp.path());

    let point = points::TX_AFTER_UNDO_APPEND;
    let result = run_child(
        module_path!(),
        "test_crash_after_undo_append_restores_pre_image",
        Injection::Crash(point),
        temp.path(),
    );
    assert_crashed(&result, point);

    let (heap, root) = open_root(temp.path());
    assert_root_filled(&heap, &root, SEED_BYTE);
    heap.check().unwrap();
}

#[test]
fn test_crash_before_commit_flag_restores_pre_image() {
    if let Some(dir) = child_data_dir() {
        let (heap, root) = open_root(&dir);
        let mut tx = heap.begin(TxParams::NONE).unwrap();
        tx.write(&root, 0, &[CHILD_BYTE; ROOT_SIZE as usize]).unwrap();
        let fresh = tx.allocate(1024, 2).unwrap();
        tx.write(&fresh, 0, b"never visible").unwrap();
        tx.set_root(Some(&fresh)).unwrap();
        tx.commit().unwrap();
        panic!("crash point did not fire");
    }

    let temp = create_temp_data_dir();
    let seeded = seed_pool(temp.path());

    let point = points::TX_BEFORE_COMMIT_FLAG;
    let result = run_child(
        module_path!(),
        "test_crash_before_commit_flag_restores_pre_image",
        Injection::Crash(point),
        temp.path(),
    );
    assert_crashed(&result, point);

    let (heap, root) = open_root(temp.path());
    assert_eq!(root, seeded);
    assert_root_filled(&heap, &root, SEED_BYTE);
    assert_eq!(heap.live_objects().unwrap(), vec![seeded]);
    assert!(heap.metrics().undo_records_replayed > 0);
    heap.check().unwrap();
}

#[test]
fn test_crash_after_commit_flag_keeps_new_state() {
    if child_data_dir().is_some() {
        overwrite_root_and_commit();
        panic!("crash point did not fire");
    }

    let temp = create_temp_data_dir();
    seed_pool(temp.path());

    let point = points::TX_AFTER_COMMIT_FLAG;
    let result = run_child(
        module_path!(),
        "test_crash_after_commit_flag_keeps_new_state",
        Injection::Crash(point),
        temp.path(),
    );
    assert_crashed(&result, point);

    let (heap, root) = open_root(temp.path());
    assert_root_filled(&heap, &root, CHILD_BYTE);
    assert_eq!(heap.metrics().undo_records_replayed, 0);
    heap.check().unwrap();
}

#[test]
fn test_commit_barrier_fault_rolls_back() {
    if let Some(dir) = child_data_dir() {
        let (heap, root) = open_root(&dir);
        let mut tx = heap.begin(TxParams::NONE).unwrap();
        tx.write(&root, 0, &[CHILD_BYTE; ROOT_SIZE as usize]).unwrap();
        tx.allocate(64, 3).unwrap();
        tx.free(&root).unwrap();

        let err = tx.commit().unwrap_err();
        assert_eq!(err.code(), HeapErrorCode::CommitFailed);

        // Rolled back in process: same root, same bytes, no new object.
        assert_eq!(heap.root().unwrap(), Some(root));
        assert_root_filled(&heap, &root, SEED_BYTE);
        assert_eq!(heap.live_objects().unwrap(), vec![root]);
        assert_eq!(heap.metrics().commit_failures, 1);
        heap.check().unwrap();
        heap.close().unwrap();
        return;
    }

    let temp = create_temp_data_dir();
    seed_pool(temp.path());

    let point = points::TX_COMMIT_BARRIER;
    let result = run_child(
        module_path!(),
        "test_commit_barrier_fault_rolls_back",
        Injection::Fault(point),
        temp.path(),
    );
    assert_passed(&result, point);

    let (heap, root) = open_root(temp.path());
    assert_root_filled(&heap, &root, SEED_BYTE);
    assert_eq!(heap.metrics().undo_records_replayed, 0);
}

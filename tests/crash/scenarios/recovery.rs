//! Recovery crash scenarios
//!
//! Same crash + same pool bytes → identical recovered state, even when
//! recovery itself is interrupted.

use crate::crash::harness::{assert_crashed, child_data_dir, run_child, Injection};
use crate::crash::utils::{
    assert_root_filled, create_temp_data_dir, open_root, pool_path, seed_pool, CHILD_BYTE,
    ROOT_SIZE, SEED_BYTE,
};
use pmheap::crash_point::{crash_point_enabled, points};
use pmheap::{PoolStore, TxParams};

const TEST_NAME: &str = "test_crash_during_recovery_is_idempotent";

#[test]
fn test_crash_during_recovery_is_idempotent() {
    if let Some(dir) = child_data_dir() {
        if crash_point_enabled(points::RECOVERY_AFTER_REPLAY) {
            // Second child: recovery replays, then dies before clearing.
            let _ = PoolStore::new().open(pool_path(&dir));
        } else {
            // First child: leave an active transaction behind.
            let (heap, root) = open_root(&dir);
            let mut tx = heap.begin(TxParams::NONE).unwrap();
            tx.write(&root, 0, &[CHILD_BYTE; ROOT_SIZE as usize]).unwrap();
            tx.commit().unwrap();
        }
        panic!("crash point did not fire");
    }

    let temp = create_temp_data_dir();
    seed_pool(temp.path());

    let first = run_child(
        module_path!(),
        TEST_NAME,
        Injection::Crash(points::TX_BEFORE_COMMIT_FLAG),
        temp.path(),
    );
    assert_crashed(&first, points::TX_BEFORE_COMMIT_FLAG);

    let second = run_child(
        module_path!(),
        TEST_NAME,
        Injection::Crash(points::RECOVERY_AFTER_REPLAY),
        temp.path(),
    );
    assert_crashed(&second, points::RECOVERY_AFTER_REPLAY);

    let (heap, root) = open_root(temp.path());
    assert_root_filled(&heap, &root, SEED_BYTE);
    assert!(heap.metrics().undo_records_replayed > 0);
    heap.check().unwrap();
    heap.close().unwrap();

    // A further open finds nothing left to undo.
    let (heap, root) = open_root(temp.path());
    assert_root_filled(&heap, &root, SEED_BYTE);
    assert_eq!(heap.metrics().undo_records_replayed, 0);
}

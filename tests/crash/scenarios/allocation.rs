//! Allocator crash scenarios

use crate::crash::harness::{assert_crashed, child_data_dir, run_child, Injection};
use crate::crash::utils::{create_temp_data_dir, open_root, seed_pool};
use pmheap::crash_point::points;

#[test]
fn test_crash_after_split_leaves_directory_unchanged() {
    if let Some(dir) = child_data_dir() {
        let (heap, _) = open_root(&dir);
        heap.allocate(128, 9).unwrap();
        panic!("crash point did not fire");
    }

    let temp = create_temp_data_dir();
    seed_pool(temp.path());
    let before = {
        let (heap, _) = open_root(temp.path());
        let directory = heap.directory().unwrap();
        heap.close().unwrap();
        directory
    };

    let point = points::ALLOC_AFTER_SPLIT;
    let result = run_child(
        module_path!(),
        "test_crash_after_split_leaves_directory_unchanged",
        Injection::Crash(point),
        temp.path(),
    );
    assert_crashed(&result, point);

    let (heap, _) = open_root(temp.path());
    assert_eq!(heap.directory().unwrap(), before);
    heap.check().unwrap();

    // The heap is fully usable after recovery.
    let obj = heap.allocate(128, 9).unwrap();
    heap.write(&obj, 0, b"after").unwrap();
}

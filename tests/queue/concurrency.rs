//! Ceiling enforcement, dynamic resizing, and concurrency stress.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use opqueue::{BoxError, OperationQueue};

use super::{manual_op, settle};

#[tokio::test]
async fn unkeyed_operations_run_in_parallel() {
    let queue = OperationQueue::new(2).unwrap();
    let (op_1, body_1) = manual_op(1);
    let (op_2, body_2) = manual_op(2);
    queue.submit_stream(5, body_1);
    queue.submit_stream(5, body_2);
    settle().await;

    assert!(op_1.started() && op_2.started());
    assert_eq!(queue.in_flight(), 2);
    op_1.finish();
    op_2.finish();
}

#[tokio::test]
async fn raising_the_ceiling_admits_immediately() {
    let queue = OperationQueue::new(2).unwrap();
    let mut ops = Vec::new();
    for value in 0..4 {
        let (op, body) = manual_op(value);
        queue.submit_stream(5, body);
        ops.push(op);
    }
    settle().await;
    assert!(ops[0].started() && ops[1].started());
    assert!(!ops[2].started());

    queue.set_max_concurrent(3).unwrap();
    settle().await;
    assert!(ops[2].started(), "the raised ceiling admits without any completion");
    assert!(!ops[3].started());

    for op in &ops {
        op.finish();
    }
}

#[tokio::test]
async fn lowering_the_ceiling_blocks_new_admissions() {
    let queue = OperationQueue::new(3).unwrap();
    let mut ops = Vec::new();
    for value in 0..6 {
        let (op, body) = manual_op(value);
        queue.submit_stream(5, body);
        ops.push(op);
    }
    settle().await;
    assert!(ops[0].started() && ops[1].started() && ops[2].started());

    // Lowering never cancels in-flight work.
    queue.set_max_concurrent(2).unwrap();
    settle().await;
    assert_eq!(queue.in_flight(), 3);

    // One completion still leaves the count at the new ceiling.
    ops[0].finish();
    settle().await;
    assert!(!ops[3].started() && !ops[4].started() && !ops[5].started());

    // The next completion drops below the ceiling: exactly one new body
    // begins, not two.
    ops[1].finish();
    settle().await;
    assert!(ops[3].started());
    assert!(!ops[4].started());

    for op in &ops {
        op.finish();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_bound_holds_under_load() {
    let max_allowed = 10;
    let queue = OperationQueue::new(max_allowed).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..100u32 {
        let current = Arc::clone(&current);
        let max_seen = Arc::clone(&max_seen);
        handles.push(queue.submit_task((i % 7) as i32, move || async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, BoxError>(i)
        }));
    }

    queue.shutdown().await.unwrap();
    assert!(max_seen.load(Ordering::SeqCst) <= max_allowed);
    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), i as u32);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn key_serialization_holds_under_load() {
    let queue = OperationQueue::new(8).unwrap();
    let keys = ["alpha", "beta", "gamma", "delta"];
    let busy: Vec<Arc<AtomicBool>> = keys.iter().map(|_| Arc::new(AtomicBool::new(false))).collect();
    let overlaps = Arc::new(AtomicUsize::new(0));

    for i in 0..80u32 {
        let slot = (i as usize) % keys.len();
        let flag = Arc::clone(&busy[slot]);
        let overlaps = Arc::clone(&overlaps);
        queue.submit_keyed_task(0, keys[slot], move || async move {
            if flag.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            flag.store(false, Ordering::SeqCst);
            Ok::<_, BoxError>(i)
        });
    }

    queue.shutdown().await.unwrap();
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

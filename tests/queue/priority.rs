//! Dispatch order under priority, bounded slots, and randomized ties.

use std::sync::{Arc, Mutex};

use opqueue::OperationQueue;

use super::{logging_op, manual_op, settle};

#[tokio::test]
async fn priority_order_with_bounded_slots() {
    let queue = OperationQueue::new(2).unwrap();
    let mut ops = Vec::new();
    for priority in [5, 5, 5, 10, 1] {
        let (op, body) = manual_op(priority as u32);
        queue.submit_stream(priority, body);
        ops.push(op);
    }
    settle().await;

    // The first two submissions took both slots before the rest arrived.
    assert!(ops[0].started() && ops[1].started());
    assert!(!ops[2].started() && !ops[3].started() && !ops[4].started());

    ops[0].finish();
    settle().await;
    assert!(
        ops[3].started(),
        "priority 10 dispatches before the older priority 5"
    );
    assert!(!ops[2].started());

    ops[1].finish();
    settle().await;
    assert!(ops[2].started());
    assert!(!ops[4].started());

    ops[2].finish();
    ops[3].finish();
    settle().await;
    assert!(ops[4].started(), "priority 1 dispatches last");
}

#[tokio::test]
async fn equal_priorities_dispatch_fifo() {
    let queue = OperationQueue::new(1).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let guard = queue.pause();
    for label in ["one", "two", "three"] {
        queue.submit_stream(5, logging_op(Arc::clone(&log), label));
    }
    drop(guard);
    settle().await;

    assert_eq!(*log.lock().unwrap(), vec!["one", "two", "three"]);
}

#[tokio::test]
async fn seeded_randomization_is_reproducible() {
    let first = randomized_run(99).await;
    let second = randomized_run(99).await;
    assert_eq!(first, second);
    assert_eq!(first.len(), 6);
}

#[tokio::test]
async fn randomization_preserves_fifo_within_a_key() {
    for seed in 0..8 {
        let queue = OperationQueue::builder()
            .max_concurrent(1)
            .randomize_equal_priority(true)
            .seed(seed)
            .build()
            .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let (blocker, blocker_body) = manual_op(0);
        queue.submit_stream(0, blocker_body);
        settle().await;

        for label in ["a1", "b1", "a2", "b2", "a3"] {
            let key = &label[..1];
            queue.submit_keyed_stream(5, key, logging_op(Arc::clone(&log), label));
        }
        blocker.finish();
        queue.shutdown().await.unwrap();

        let order = log.lock().unwrap().clone();
        let a_positions: Vec<usize> = ["a1", "a2", "a3"]
            .iter()
            .map(|l| order.iter().position(|x| x == l).unwrap())
            .collect();
        let b_positions: Vec<usize> = ["b1", "b2"]
            .iter()
            .map(|l| order.iter().position(|x| x == l).unwrap())
            .collect();
        assert!(a_positions.windows(2).all(|w| w[0] < w[1]), "seed {seed}: {order:?}");
        assert!(b_positions.windows(2).all(|w| w[0] < w[1]), "seed {seed}: {order:?}");
    }
}

async fn randomized_run(seed: u64) -> Vec<String> {
    let queue = OperationQueue::builder()
        .max_concurrent(1)
        .randomize_equal_priority(true)
        .seed(seed)
        .build()
        .unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let (blocker, blocker_body) = manual_op(0);
    queue.submit_stream(0, blocker_body);
    settle().await;

    for label in ["a", "b", "c", "d", "e", "f"] {
        queue.submit_keyed_stream(5, label, logging_op(Arc::clone(&log), label));
    }
    blocker.finish();
    queue.shutdown().await.unwrap();

    let order = log.lock().unwrap().clone();
    order
}

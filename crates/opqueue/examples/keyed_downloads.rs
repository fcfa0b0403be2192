//! Simulated download scheduler: bulk prefetches at low priority, an urgent
//! user-requested fetch at high priority, and per-host serialization via
//! keys.
//!
//! Run with: cargo run --example keyed_downloads

use std::time::Duration;

use opqueue::{BoxError, OperationQueue};

async fn download(host: &str, path: &str) -> Result<String, BoxError> {
    // Stand-in for a real transfer.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(format!("{host}{path}"))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let queue = OperationQueue::builder()
        .name("downloads")
        .max_concurrent(2)
        .on_admitted(|id| println!("admitted #{id}"))
        .build()?;

    // Bulk prefetch work: low priority, serialized per host.
    for i in 0..4 {
        let path = format!("/chunk/{i}");
        let _ = queue.submit_keyed_task(1, "mirror.example.com", move || async move {
            download("mirror.example.com", &path).await
        });
    }

    // A user just clicked something: this dispatches ahead of the backlog.
    let urgent = queue.submit_task(10, || download("cdn.example.com", "/thumbnail.png"));
    println!("urgent fetch -> {}", urgent.await?);

    // Drain everything before exiting.
    queue.shutdown().await?;
    println!("all transfers finished");
    Ok(())
}

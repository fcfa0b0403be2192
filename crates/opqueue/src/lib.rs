//! Priority- and key-aware scheduling for in-process asynchronous operations.
//!
//! An [`OperationQueue`] accepts deferred units of work and dispatches them
//! under three interleaved policies:
//!
//! - a bounded number of operations run at once (the concurrency ceiling,
//!   adjustable at runtime);
//! - higher-priority submissions dispatch earlier, with FIFO order among
//!   equals;
//! - operations sharing a *key* never overlap: per key, bodies run strictly
//!   one at a time in submission order, while unkeyed operations stay fully
//!   parallel.
//!
//! On top of the dispatch machine the queue offers reference-counted
//! pausing, cooperative cancellation, and graceful shutdown draining.
//!
//! # Task-style usage
//!
//! ```rust
//! use opqueue::OperationQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let queue = OperationQueue::new(2)?;
//!
//! // The handle resolves to the body's value when awaited.
//! let fetch = queue.submit_task(5, || async { Ok::<_, opqueue::BoxError>(42u32) });
//! assert_eq!(fetch.await?, 42);
//! # Ok(())
//! # }
//! ```
//!
//! # Serializing writes to a shared resource
//!
//! Submissions with the same key never run concurrently, so writes keyed by
//! resource cannot interleave no matter how the ceiling is set:
//!
//! ```rust
//! use opqueue::OperationQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let queue = OperationQueue::builder()
//!     .name("replica-sync")
//!     .max_concurrent(8)
//!     .build()?;
//!
//! let first = queue.submit_keyed_task(5, "users.db", || async {
//!     // write batch #1
//!     Ok::<_, opqueue::BoxError>(())
//! });
//! let second = queue.submit_keyed_task(5, "users.db", || async {
//!     // write batch #2, guaranteed not to overlap batch #1
//!     Ok::<_, opqueue::BoxError>(())
//! });
//!
//! first.await?;
//! second.await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Streams, cancellation, pause, shutdown
//!
//! Stream-producing bodies relay everything they emit to a replayable,
//! multi-subscriber [`OperationHandle`]; see
//! [`submit_stream`](OperationQueue::submit_stream) and
//! [`submit_stream_with_cancel`](OperationQueue::submit_stream_with_cancel).
//! [`pause`](OperationQueue::pause) holds back new admissions while a guard
//! is alive, [`set_max_concurrent`](OperationQueue::set_max_concurrent)
//! resizes the ceiling on the fly, and
//! [`shutdown`](OperationQueue::shutdown) drains everything already queued.

pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod heap;
pub mod queue;

mod gate;
mod operation;
mod router;

pub use config::{QueueConfig, QueueConfigBuilder};
pub use error::{BoxError, ConfigError, OperationError};
pub use events::{EventKind, EventListener, QueueEvent};
pub use handle::{OperationHandle, ReplayStream, Termination};
pub use heap::{HeapOrder, PriorityHeap};
pub use queue::{OperationQueue, PauseGuard, ShutdownHandle};

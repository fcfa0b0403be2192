//! Operation records and their execution futures.
//!
//! A submitted operation is type-erased at the submission boundary: the body,
//! the cancel signal, and the result sink are folded into one lazy future
//! that performs the whole run when first polled. Until then the record sits
//! in the heap (or parked behind its key) without doing any work.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};

use crate::error::{BoxError, OperationError};
use crate::handle::SinkWriter;
use crate::heap::HeapOrder;

/// Process-wide id source. Ids are only a stable FIFO tiebreaker and a trace
/// label, so sharing the counter across queue instances is harmless.
static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_operation_id() -> u64 {
    NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) type LaunchFuture = BoxFuture<'static, Result<(), OperationError>>;

/// A submitted operation waiting in the priority heap.
pub(crate) struct QueuedOperation {
    pub(crate) id: u64,
    pub(crate) priority: i32,
    pub(crate) key: Option<String>,
    pub(crate) random_order: Option<u64>,
    pub(crate) fut: LaunchFuture,
}

/// An admitted operation, ready to be spawned (or parked behind its key).
pub(crate) struct Launch {
    pub(crate) id: u64,
    pub(crate) key: Option<String>,
    pub(crate) fut: LaunchFuture,
}

impl QueuedOperation {
    pub(crate) fn into_launch(self) -> Launch {
        Launch {
            id: self.id,
            key: self.key,
            fut: self.fut,
        }
    }
}

impl HeapOrder for QueuedOperation {
    /// Composite dispatch order:
    /// 1. higher priority first;
    /// 2. at equal priority, unkeyed before keyed, so serialized key groups
    ///    cannot occupy every slot while parallelizable work waits;
    /// 3. within the same key, FIFO by id;
    /// 4. across keys, by the submission-time random draw when randomization
    ///    is enabled;
    /// 5. otherwise FIFO by id.
    fn precedes(&self, other: &Self) -> bool {
        if self.priority != other.priority {
            return self.priority > other.priority;
        }
        match (&self.key, &other.key) {
            (None, Some(_)) => return true,
            (Some(_), None) => return false,
            (Some(a), Some(b)) if a == b => return self.id < other.id,
            _ => {}
        }
        if let (Some(a), Some(b)) = (self.random_order, other.random_order) {
            if a != b {
                return a < b;
            }
        }
        self.id < other.id
    }
}

impl fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("key", &self.key)
            .field("random_order", &self.random_order)
            .finish_non_exhaustive()
    }
}

/// Builds the erased run-to-termination future for one operation.
///
/// The first poll consults the cancel signal before anything else: a signal
/// that fired while the operation was queued (or parked) means the body is
/// never invoked and the handle terminates cancelled. After the body starts,
/// the signal completes the observable stream from downstream; whatever the
/// body does beyond that point is its own business.
pub(crate) fn operation_future<T, S, F, C>(
    body: F,
    cancel: Option<C>,
    sink: SinkWriter<T>,
) -> LaunchFuture
where
    T: Clone + Send + 'static,
    S: Stream<Item = Result<T, BoxError>> + Send + 'static,
    F: FnOnce() -> S + Send + 'static,
    C: Future<Output = ()> + Send + 'static,
{
    Box::pin(async move {
        let mut cancel = std::pin::pin!(async move {
            match cancel {
                Some(signal) => signal.await,
                None => futures::future::pending::<()>().await,
            }
        });

        // Cancelled while queued: skip the body entirely.
        if futures::poll!(cancel.as_mut()).is_ready() {
            sink.cancel();
            return Err(OperationError::Cancelled);
        }

        let stream = body();
        let mut stream = std::pin::pin!(stream);
        loop {
            tokio::select! {
                biased;
                _ = cancel.as_mut() => {
                    sink.cancel();
                    return Err(OperationError::Cancelled);
                }
                item = stream.next() => match item {
                    Some(Ok(value)) => sink.emit(value),
                    Some(Err(err)) => {
                        let err = OperationError::from_body(err);
                        sink.fail(err.clone());
                        return Err(err);
                    }
                    None => {
                        sink.complete();
                        return Ok(());
                    }
                },
            }
        }
    })
}

//! Events emitted by the operation queue.

use std::sync::Arc;
use std::time::Instant;

/// A lifecycle notification from an [`OperationQueue`](crate::OperationQueue).
///
/// Events are delivered outside the queue's internal lock, on whichever
/// thread drove the transition. [`EventKind::Admitted`] fires when an
/// operation is granted an in-flight slot, which can be before its body runs
/// if the operation is waiting behind another with the same key.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    /// Name of the queue that emitted this event.
    pub queue_name: String,
    /// When the transition happened.
    pub timestamp: Instant,
    /// What happened.
    pub kind: EventKind,
}

/// The transition a [`QueueEvent`] describes.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// An operation entered the priority queue.
    Submitted {
        /// Operation id.
        id: u64,
        /// Submission priority.
        priority: i32,
        /// Serialization key, if any.
        key: Option<String>,
    },
    /// An operation was granted an in-flight slot.
    Admitted {
        /// Operation id.
        id: u64,
        /// Submission priority.
        priority: i32,
    },
    /// An operation's value stream completed.
    Finished {
        /// Operation id.
        id: u64,
    },
    /// An operation's body terminated with an error.
    Failed {
        /// Operation id.
        id: u64,
    },
    /// An operation terminated through its cancel signal.
    Cancelled {
        /// Operation id.
        id: u64,
    },
    /// A submission was rejected because the queue is shutting down.
    Rejected {
        /// Operation id.
        id: u64,
    },
    /// The first outstanding pause grant took effect.
    Paused,
    /// The last pause grant was released.
    Resumed,
    /// The concurrency ceiling changed.
    ConcurrencyChanged {
        /// The new ceiling.
        max_concurrent: usize,
    },
    /// Shutdown began; no further submissions are accepted.
    ShutdownStarted,
    /// Every admitted operation has terminated.
    ShutdownCompleted,
}

impl EventKind {
    /// Stable label for this kind of event, usable as a log or metric tag.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Submitted { .. } => "operation_submitted",
            EventKind::Admitted { .. } => "operation_admitted",
            EventKind::Finished { .. } => "operation_finished",
            EventKind::Failed { .. } => "operation_failed",
            EventKind::Cancelled { .. } => "operation_cancelled",
            EventKind::Rejected { .. } => "operation_rejected",
            EventKind::Paused => "queue_paused",
            EventKind::Resumed => "queue_resumed",
            EventKind::ConcurrencyChanged { .. } => "concurrency_changed",
            EventKind::ShutdownStarted => "shutdown_started",
            EventKind::ShutdownCompleted => "shutdown_completed",
        }
    }
}

/// Observer of queue lifecycle events.
///
/// Any `Fn(&QueueEvent)` closure is a listener; implement the trait by hand
/// when the listener carries state of its own. Listeners run synchronously
/// on the thread that produced the event, so they should be cheap.
pub trait EventListener: Send + Sync {
    /// Called for every event the queue emits.
    fn on_event(&self, event: &QueueEvent);
}

impl<F> EventListener for F
where
    F: Fn(&QueueEvent) + Send + Sync,
{
    fn on_event(&self, event: &QueueEvent) {
        self(event)
    }
}

/// The listeners registered at queue construction. Fixed after build.
#[derive(Clone)]
pub(crate) struct Listeners {
    entries: Vec<Arc<dyn EventListener>>,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn add<L>(&mut self, listener: L)
    where
        L: EventListener + 'static,
    {
        self.entries.push(Arc::new(listener));
    }

    /// True when no listeners are registered. The queue checks this before
    /// building an event at all, so an unobserved queue pays nothing.
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Notifies every listener of `event`.
    ///
    /// A panicking listener cannot sever the dispatch chain that produced
    /// the event (release, unpark, shutdown completion), and the remaining
    /// listeners still run.
    pub(crate) fn notify(&self, event: &QueueEvent) {
        for listener in &self.entries {
            let call = std::panic::AssertUnwindSafe(|| listener.on_event(event));
            if std::panic::catch_unwind(call).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    queue = %event.queue_name,
                    event = event.kind.name(),
                    "queue event listener panicked"
                );
            }
        }
    }
}

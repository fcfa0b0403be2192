//! Configuration for the operation queue.

use crate::error::ConfigError;
use crate::events::{EventKind, EventListener, Listeners, QueueEvent};
use crate::queue::OperationQueue;

pub(crate) const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Configuration for an [`OperationQueue`].
#[derive(Clone)]
pub struct QueueConfig {
    pub(crate) name: String,
    pub(crate) max_concurrent: usize,
    pub(crate) randomize_equal_priority: bool,
    pub(crate) seed: Option<u64>,
    pub(crate) runtime: Option<tokio::runtime::Handle>,
    pub(crate) listeners: Listeners,
}

impl QueueConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }
}

/// Builder for queue configuration.
pub struct QueueConfigBuilder {
    name: String,
    max_concurrent: usize,
    randomize_equal_priority: bool,
    seed: Option<u64>,
    runtime: Option<tokio::runtime::Handle>,
    listeners: Listeners,
}

impl QueueConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: "operation-queue".to_string(),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            randomize_equal_priority: false,
            seed: None,
            runtime: None,
            listeners: Listeners::new(),
        }
    }

    /// Sets the name of this queue instance, used in events and traces.
    ///
    /// Default: "operation-queue"
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the concurrency ceiling. Must be at least 1.
    ///
    /// This is the submission-time ceiling the queue returns to when a pause
    /// ends and while shutdown drains.
    ///
    /// Default: 4
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Breaks equal-priority ties across different keys with a random draw
    /// taken at submission time instead of submission order. FIFO within a
    /// key is preserved either way.
    ///
    /// Default: false
    pub fn randomize_equal_priority(mut self, randomize: bool) -> Self {
        self.randomize_equal_priority = randomize;
        self
    }

    /// Seeds the random tiebreak, making orderings reproducible. Only
    /// meaningful together with
    /// [`randomize_equal_priority`](Self::randomize_equal_priority).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Runs operations on the given runtime instead of the runtime the
    /// submitting task happens to be on.
    pub fn runtime(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Registers a callback for every submission, with the operation id and
    /// priority.
    pub fn on_submitted<F>(mut self, f: F) -> Self
    where
        F: Fn(u64, i32) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &QueueEvent| {
            if let EventKind::Submitted { id, priority, .. } = &event.kind {
                f(*id, *priority);
            }
        });
        self
    }

    /// Registers a callback for every admission (an operation being granted
    /// an in-flight slot), with the operation id.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &QueueEvent| {
            if let EventKind::Admitted { id, .. } = &event.kind {
                f(*id);
            }
        });
        self
    }

    /// Registers a callback for operations whose value stream completed.
    pub fn on_finished<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &QueueEvent| {
            if let EventKind::Finished { id } = &event.kind {
                f(*id);
            }
        });
        self
    }

    /// Registers a callback for operations whose body failed.
    pub fn on_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &QueueEvent| {
            if let EventKind::Failed { id } = &event.kind {
                f(*id);
            }
        });
        self
    }

    /// Registers a callback for cancelled operations.
    pub fn on_cancelled<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &QueueEvent| {
            if let EventKind::Cancelled { id } = &event.kind {
                f(*id);
            }
        });
        self
    }

    /// Registers a callback for the queue pausing (first outstanding grant).
    pub fn on_paused<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &QueueEvent| {
            if let EventKind::Paused = &event.kind {
                f();
            }
        });
        self
    }

    /// Registers a callback for the queue resuming (last grant released).
    pub fn on_resumed<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.add(move |event: &QueueEvent| {
            if let EventKind::Resumed = &event.kind {
                f();
            }
        });
        self
    }

    /// Registers a listener receiving every [`QueueEvent`].
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.listeners.add(listener);
        self
    }

    /// Builds the queue.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxConcurrent`] if the ceiling is zero.
    pub fn build(self) -> Result<OperationQueue, ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::InvalidMaxConcurrent { given: 0 });
        }
        Ok(OperationQueue::from_config(QueueConfig {
            name: self.name,
            max_concurrent: self.max_concurrent,
            randomize_equal_priority: self.randomize_equal_priority,
            seed: self.seed,
            runtime: self.runtime,
            listeners: self.listeners,
        }))
    }
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

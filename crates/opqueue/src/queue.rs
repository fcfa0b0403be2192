//! The operation queue facade.
//!
//! [`OperationQueue`] is the public entry point: it wraps submitted bodies
//! into operation records, feeds them through the priority gate and the key
//! router, and spawns admitted operations onto a tokio runtime. All facade
//! methods return promptly; only the returned handles suspend their callers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

use futures::Stream;
use futures::stream;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio_util::sync::CancellationToken;

use crate::config::{QueueConfig, QueueConfigBuilder};
use crate::error::{BoxError, ConfigError, OperationError};
use crate::events::{EventKind, Listeners, QueueEvent};
use crate::gate::{Admission, PriorityGate};
use crate::handle::{OperationHandle, SinkWriter};
use crate::operation::{self, Launch, QueuedOperation};

#[cfg(feature = "tracing")]
use tracing::debug;

/// A bounded-concurrency, priority-ordered, key-serializing scheduler for
/// in-process asynchronous operations.
///
/// Cloning the queue is cheap; clones share the same state. The queue must
/// either be given a runtime via
/// [`QueueConfigBuilder::runtime`](crate::QueueConfigBuilder::runtime) or be
/// driven from within one: submissions (and pause-guard drops) spawn tasks
/// with `tokio::spawn` otherwise.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    listeners: Listeners,
    runtime: Option<tokio::runtime::Handle>,
    gate: Mutex<PriorityGate>,
    shutdown: ShutdownCell,
}

impl OperationQueue {
    /// Creates a queue with the given concurrency ceiling and defaults for
    /// everything else.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxConcurrent`] if `max_concurrent` is
    /// zero.
    pub fn new(max_concurrent: usize) -> Result<Self, ConfigError> {
        QueueConfig::builder().max_concurrent(max_concurrent).build()
    }

    /// Creates a configuration builder.
    pub fn builder() -> QueueConfigBuilder {
        QueueConfig::builder()
    }

    pub(crate) fn from_config(config: QueueConfig) -> Self {
        let rng = if config.randomize_equal_priority {
            Some(match config.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            })
        } else {
            None
        };
        Self {
            inner: Arc::new(Inner {
                name: config.name,
                listeners: config.listeners,
                runtime: config.runtime,
                gate: Mutex::new(PriorityGate::new(config.max_concurrent, rng)),
                shutdown: ShutdownCell::new(),
            }),
        }
    }

    /// Returns the queue's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the configured concurrency ceiling.
    pub fn max_concurrent(&self) -> usize {
        self.inner.gate.lock().max_concurrent
    }

    /// Returns the number of admitted, not-yet-terminated operations.
    /// Operations parked behind their key count as in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.gate.lock().in_flight
    }

    /// Returns the number of operations still waiting in the priority queue.
    pub fn queued(&self) -> usize {
        self.inner.gate.lock().heap.len()
    }

    /// Submits an unkeyed stream-producing operation.
    ///
    /// `body` is invoked once, when the operation is dispatched; everything
    /// its stream emits is relayed to the returned handle. Unkeyed
    /// operations run concurrently, subject only to the ceiling.
    pub fn submit_stream<T, S, F>(&self, priority: i32, body: F) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        self.submit_inner(priority, None, NEVER_CANCELLED, body)
    }

    /// Submits a stream-producing operation serialized on `key`.
    ///
    /// At most one operation per key is ever running; same-key operations
    /// run in submission order.
    pub fn submit_keyed_stream<T, S, F>(
        &self,
        priority: i32,
        key: impl Into<String>,
        body: F,
    ) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
        F: FnOnce() -> S + Send + 'static,
    {
        self.submit_inner(priority, Some(key.into()), NEVER_CANCELLED, body)
    }

    /// Submits a stream-producing operation with an explicit cancel signal.
    ///
    /// The first completion of `cancel` requests cancellation: before
    /// dispatch it prevents the body from ever running; after dispatch it
    /// completes the handle's stream, whether or not the body keeps working.
    pub fn submit_stream_with_cancel<T, S, F, C>(
        &self,
        priority: i32,
        key: Option<&str>,
        cancel: C,
        body: F,
    ) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
        F: FnOnce() -> S + Send + 'static,
        C: Future<Output = ()> + Send + 'static,
    {
        self.submit_inner(priority, key.map(str::to_owned), Some(cancel), body)
    }

    /// Submits a task-style body producing a single value. The returned
    /// handle resolves to that value when awaited.
    pub fn submit_task<T, E, Fut, F>(&self, priority: i32, body: F) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError> + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
    {
        self.submit_inner(priority, None, NEVER_CANCELLED, task_body(body))
    }

    /// Submits a task-style body serialized on `key`.
    pub fn submit_keyed_task<T, E, Fut, F>(
        &self,
        priority: i32,
        key: impl Into<String>,
        body: F,
    ) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError> + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
    {
        self.submit_inner(priority, Some(key.into()), NEVER_CANCELLED, task_body(body))
    }

    /// Submits a task-style body wired to a [`CancellationToken`].
    ///
    /// A token that is already cancelled short-circuits: the operation is
    /// never enqueued and the returned handle is already terminated as
    /// cancelled.
    pub fn submit_task_with_token<T, E, Fut, F>(
        &self,
        priority: i32,
        key: Option<&str>,
        token: CancellationToken,
        body: F,
    ) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        E: Into<BoxError> + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
    {
        if token.is_cancelled() {
            let sink = SinkWriter::new();
            let handle = sink.handle();
            sink.cancel();
            return handle;
        }
        self.submit_inner(
            priority,
            key.map(str::to_owned),
            Some(token.cancelled_owned()),
            task_body(body),
        )
    }

    fn submit_inner<T, S, F, C>(
        &self,
        priority: i32,
        key: Option<String>,
        cancel: Option<C>,
        body: F,
    ) -> OperationHandle<T>
    where
        T: Clone + Send + 'static,
        S: Stream<Item = Result<T, BoxError>> + Send + 'static,
        F: FnOnce() -> S + Send + 'static,
        C: Future<Output = ()> + Send + 'static,
    {
        let sink = SinkWriter::new();
        let handle = sink.handle();
        let id = operation::next_operation_id();

        let mut events = Vec::new();
        let launches = {
            let mut gate = self.inner.gate.lock();
            if gate.shutting_down {
                drop(gate);
                sink.fail(OperationError::ShutdownInProgress);
                #[cfg(feature = "tracing")]
                debug!(queue = %self.inner.name, id, "submission rejected: shutting down");
                self.inner.emit(EventKind::Rejected { id });
                return handle;
            }

            let random_order = gate.draw_random_order(key.as_deref());
            let fut = operation::operation_future(body, cancel, sink);
            gate.heap.push(QueuedOperation {
                id,
                priority,
                key: key.clone(),
                random_order,
                fut,
            });
            self.inner.push_event(
                &mut events,
                EventKind::Submitted {
                    id,
                    priority,
                    key: key.clone(),
                },
            );
            let admissions = gate.dispatch();
            self.inner.admission_events(admissions, &mut events)
        };

        #[cfg(feature = "tracing")]
        debug!(
            queue = %self.inner.name,
            id,
            priority,
            key = key.as_deref().unwrap_or("<default>"),
            "operation submitted"
        );

        self.inner.emit_all(&events);
        self.inner.spawn_launches(launches);
        handle
    }

    /// Pauses admissions until the returned guard (and every other
    /// outstanding guard) is dropped.
    ///
    /// Pausing is reference-counted: nested pauses stack, and the queue
    /// resumes when the last guard goes. In-flight operations keep running;
    /// only new admissions are held back.
    #[must_use = "the queue resumes when the guard is dropped"]
    pub fn pause(&self) -> PauseGuard {
        let first = {
            let mut gate = self.inner.gate.lock();
            gate.pause_count += 1;
            gate.pause_count == 1
        };
        if first {
            #[cfg(feature = "tracing")]
            debug!(queue = %self.inner.name, "queue paused");
            self.inner.emit(EventKind::Paused);
        }
        PauseGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Changes the concurrency ceiling.
    ///
    /// The update happens under a pause so it is observed atomically; on
    /// resume the drain loop re-fires, so an increase admits queued work
    /// immediately. A decrease never cancels in-flight operations: new
    /// admissions wait until completions bring the count under the new
    /// ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxConcurrent`] if `max_concurrent` is
    /// zero.
    pub fn set_max_concurrent(&self, max_concurrent: usize) -> Result<(), ConfigError> {
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidMaxConcurrent { given: 0 });
        }
        let guard = self.pause();
        self.inner.gate.lock().max_concurrent = max_concurrent;
        #[cfg(feature = "tracing")]
        debug!(queue = %self.inner.name, max_concurrent, "concurrency ceiling changed");
        self.inner.emit(EventKind::ConcurrencyChanged { max_concurrent });
        drop(guard);
        Ok(())
    }

    /// Shuts the queue down.
    ///
    /// Idempotent. Submission closes immediately; everything already queued
    /// is dispatched in priority order, overriding any outstanding pause.
    /// The returned handle resolves once every admitted operation has
    /// terminated: with the first body failure the queue ever observed, or
    /// `Ok(())` when there was none.
    pub fn shutdown(&self) -> ShutdownHandle {
        let mut events = Vec::new();
        let mut completed = None;
        let launches = {
            let mut gate = self.inner.gate.lock();
            if gate.shutting_down {
                Vec::new()
            } else {
                gate.shutting_down = true;
                self.inner.push_event(&mut events, EventKind::ShutdownStarted);
                let admissions = gate.dispatch();
                let launches = self.inner.admission_events(admissions, &mut events);
                if gate.drained() {
                    completed = Some(gate.shutdown_result());
                }
                launches
            }
        };

        #[cfg(feature = "tracing")]
        debug!(queue = %self.inner.name, "queue shutting down");

        self.inner.emit_all(&events);
        self.inner.spawn_launches(launches);
        if let Some(result) = completed {
            self.inner.complete_shutdown(result);
        }
        self.inner.shutdown.subscribe()
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let gate = self.inner.gate.lock();
        f.debug_struct("OperationQueue")
            .field("name", &self.inner.name)
            .field("max_concurrent", &gate.max_concurrent)
            .field("in_flight", &gate.in_flight)
            .field("queued", &gate.heap.len())
            .field("shutting_down", &gate.shutting_down)
            .finish()
    }
}

/// Never-firing cancel signal for the overloads without one. The concrete
/// type only pins down `C` for `submit_inner`; the value is always `None`.
const NEVER_CANCELLED: Option<futures::future::Pending<()>> = None;

/// Adapts a future-producing closure into a one-shot stream body.
fn task_body<T, E, Fut, F>(
    body: F,
) -> impl FnOnce() -> stream::Once<futures::future::BoxFuture<'static, Result<T, BoxError>>> + Send
where
    T: Send + 'static,
    E: Into<BoxError> + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
{
    move || {
        let fut: futures::future::BoxFuture<'static, Result<T, BoxError>> = Box::pin(async move {
            body().await.map_err(Into::into)
        });
        stream::once(fut)
    }
}

impl Inner {
    fn event(&self, kind: EventKind) -> QueueEvent {
        QueueEvent {
            queue_name: self.name.clone(),
            timestamp: Instant::now(),
            kind,
        }
    }

    fn emit(&self, kind: EventKind) {
        if self.listeners.is_empty() {
            return;
        }
        self.listeners.notify(&self.event(kind));
    }

    // Events are only materialized when someone will see them.
    fn push_event(&self, events: &mut Vec<QueueEvent>, kind: EventKind) {
        if !self.listeners.is_empty() {
            events.push(self.event(kind));
        }
    }

    fn emit_all(&self, events: &[QueueEvent]) {
        for event in events {
            self.listeners.notify(event);
        }
    }

    /// Converts dispatch results into admission events, handing back the
    /// launches that may run right away.
    fn admission_events(
        &self,
        admissions: Vec<Admission>,
        events: &mut Vec<QueueEvent>,
    ) -> Vec<Launch> {
        let mut launches = Vec::with_capacity(admissions.len());
        for admission in admissions {
            self.push_event(
                events,
                EventKind::Admitted {
                    id: admission.id,
                    priority: admission.priority,
                },
            );
            if let Some(launch) = admission.launch {
                launches.push(launch);
            }
        }
        launches
    }

    fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        match &self.runtime {
            Some(handle) => {
                handle.spawn(fut);
            }
            None => {
                tokio::spawn(fut);
            }
        }
    }

    fn spawn_launches(self: &Arc<Self>, launches: Vec<Launch>) {
        for launch in launches {
            self.spawn_launch(launch);
        }
    }

    fn spawn_launch(self: &Arc<Self>, launch: Launch) {
        let inner = Arc::clone(self);
        let Launch { id, key, fut } = launch;
        self.spawn(async move {
            let terminal = fut.await;
            Inner::on_terminated(&inner, id, key, terminal);
        });
    }

    /// Runs once per admitted operation, on whatever thread its run future
    /// finished on: releases the slot, unparks the next same-key operation,
    /// re-runs the dispatch loop, and completes shutdown once drained.
    fn on_terminated(
        inner: &Arc<Inner>,
        id: u64,
        key: Option<String>,
        terminal: Result<(), OperationError>,
    ) {
        let mut events = Vec::new();
        inner.push_event(
            &mut events,
            match &terminal {
                Ok(()) => EventKind::Finished { id },
                Err(OperationError::Cancelled) => EventKind::Cancelled { id },
                Err(_) => EventKind::Failed { id },
            },
        );

        let mut completed = None;
        let mut launches = Vec::new();
        {
            let mut gate = inner.gate.lock();
            if let Err(err) = &terminal {
                if err.is_failed() {
                    gate.record_failure(err);
                }
            }
            if let Some(next) = gate.release(key.as_deref()) {
                launches.push(next);
            }
            let admissions = gate.dispatch();
            launches.extend(inner.admission_events(admissions, &mut events));
            if gate.drained() {
                completed = Some(gate.shutdown_result());
            }
        }

        #[cfg(feature = "tracing")]
        debug!(
            queue = %inner.name,
            id,
            outcome = match &terminal {
                Ok(()) => "finished",
                Err(OperationError::Cancelled) => "cancelled",
                Err(_) => "failed",
            },
            "operation terminated, slot released"
        );

        inner.emit_all(&events);
        inner.spawn_launches(launches);
        if let Some(result) = completed {
            inner.complete_shutdown(result);
        }
    }

    fn complete_shutdown(&self, result: Result<(), OperationError>) {
        if self.shutdown.complete(result) {
            #[cfg(feature = "tracing")]
            debug!(queue = %self.name, "shutdown complete");
            self.emit(EventKind::ShutdownCompleted);
        }
    }
}

/// A reference-counted pause grant. Dropping it releases one unit of the
/// pause count; admissions resume when the count reaches zero.
#[must_use = "the queue resumes when the guard is dropped"]
pub struct PauseGuard {
    inner: Arc<Inner>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        let mut events = Vec::new();
        let mut resumed = false;
        let launches = {
            let mut gate = self.inner.gate.lock();
            gate.pause_count -= 1;
            if gate.pause_count == 0 {
                resumed = true;
                self.inner.push_event(&mut events, EventKind::Resumed);
                let admissions = gate.dispatch();
                self.inner.admission_events(admissions, &mut events)
            } else {
                Vec::new()
            }
        };

        if resumed {
            #[cfg(feature = "tracing")]
            debug!(queue = %self.inner.name, "queue resumed");
        }

        self.inner.emit_all(&events);
        self.inner.spawn_launches(launches);
    }
}

impl std::fmt::Debug for PauseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseGuard").finish_non_exhaustive()
    }
}

struct ShutdownState {
    result: Option<Result<(), OperationError>>,
    wakers: Vec<Waker>,
}

pub(crate) struct ShutdownCell {
    state: Arc<Mutex<ShutdownState>>,
}

impl ShutdownCell {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ShutdownState {
                result: None,
                wakers: Vec::new(),
            })),
        }
    }

    /// Stores the terminal result. Returns `false` if already complete.
    fn complete(&self, result: Result<(), OperationError>) -> bool {
        let mut state = self.state.lock();
        if state.result.is_some() {
            return false;
        }
        state.result = Some(result);
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
        true
    }

    fn subscribe(&self) -> ShutdownHandle {
        ShutdownHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Future resolving when shutdown has drained every admitted operation.
///
/// Resolves with the first body failure the queue observed, or `Ok(())`.
/// Cloneable; every clone resolves with the same result.
pub struct ShutdownHandle {
    state: Arc<Mutex<ShutdownState>>,
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Future for ShutdownHandle {
    type Output = Result<(), OperationError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.state.lock();
        match &state.result {
            Some(result) => Poll::Ready(result.clone()),
            None => {
                if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    state.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("complete", &self.state.lock().result.is_some())
            .finish()
    }
}

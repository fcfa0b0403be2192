//! Replayable result handles.
//!
//! Every operation writes its values into a replay buffer. Handles are cheap
//! clones over that buffer; each subscription replays the history from the
//! beginning and then follows the live stream, so late subscribers observe
//! the same sequence early ones did. The buffer terminates exactly once.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;

use crate::error::OperationError;

struct SinkState<T> {
    items: Vec<T>,
    terminal: Option<Result<(), OperationError>>,
    wakers: Vec<Waker>,
}

impl<T> SinkState<T> {
    fn register(&mut self, waker: &Waker) {
        if !self.wakers.iter().any(|w| w.will_wake(waker)) {
            self.wakers.push(waker.clone());
        }
    }

    fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }
}

/// Write side of the replay buffer. Owned by the operation's run future.
pub(crate) struct SinkWriter<T> {
    shared: Arc<Mutex<SinkState<T>>>,
}

impl<T> SinkWriter<T> {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(SinkState {
                items: Vec::new(),
                terminal: None,
                wakers: Vec::new(),
            })),
        }
    }

    pub(crate) fn handle(&self) -> OperationHandle<T> {
        OperationHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn emit(&self, value: T) {
        let mut state = self.shared.lock();
        if state.terminal.is_none() {
            state.items.push(value);
            state.wake_all();
        }
    }

    pub(crate) fn complete(&self) {
        self.terminate(Ok(()));
    }

    pub(crate) fn cancel(&self) {
        self.terminate(Err(OperationError::Cancelled));
    }

    pub(crate) fn fail(&self, err: OperationError) {
        self.terminate(Err(err));
    }

    // First terminal wins; later calls are ignored.
    fn terminate(&self, result: Result<(), OperationError>) {
        let mut state = self.shared.lock();
        if state.terminal.is_none() {
            state.terminal = Some(result);
            state.wake_all();
        }
    }
}

/// A multi-subscriber, replayable view of one operation's result stream.
///
/// Obtained from the `submit_*` methods of
/// [`OperationQueue`](crate::OperationQueue). Cloning is cheap and every
/// clone observes the same underlying buffer. Awaiting the handle directly
/// resolves to the operation's first value, which is the natural shape for
/// task-style submissions.
pub struct OperationHandle<T> {
    shared: Arc<Mutex<SinkState<T>>>,
}

impl<T> Clone for OperationHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> OperationHandle<T> {
    /// Returns the terminal state, or `None` while the operation is live.
    ///
    /// `Ok(())` is a completed value stream, `Err(Cancelled)` a cancellation,
    /// `Err(Failed)` a body error, `Err(ShutdownInProgress)` a submission the
    /// queue rejected.
    pub fn outcome(&self) -> Option<Result<(), OperationError>> {
        self.shared.lock().terminal.clone()
    }

    /// Returns `true` once the operation has terminated.
    pub fn is_terminated(&self) -> bool {
        self.shared.lock().terminal.is_some()
    }

    /// Returns a future resolving with the terminal state.
    pub fn terminated(&self) -> Termination<T> {
        Termination {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone> OperationHandle<T> {
    /// Subscribes to the result stream.
    ///
    /// The subscription first replays every value emitted so far, then yields
    /// live values. A body error is delivered as one final `Err` item;
    /// completion and cancellation end the stream cleanly (use
    /// [`outcome`](Self::outcome) to tell them apart).
    pub fn subscribe(&self) -> ReplayStream<T> {
        ReplayStream {
            shared: Arc::clone(&self.shared),
            position: 0,
            errored: false,
        }
    }
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("OperationHandle")
            .field("values", &state.items.len())
            .field("terminal", &state.terminal)
            .finish()
    }
}

impl<T> IntoFuture for OperationHandle<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, OperationError>;
    type IntoFuture = BoxFuture<'static, Result<T, OperationError>>;

    /// Resolves to the operation's first value. An operation that terminates
    /// without emitting resolves to `Err(Cancelled)`; task-style bodies only
    /// do that when their cancel signal fired.
    fn into_future(self) -> Self::IntoFuture {
        let mut stream = self.subscribe();
        Box::pin(async move {
            match stream.next().await {
                Some(Ok(value)) => Ok(value),
                Some(Err(err)) => Err(err),
                None => Err(OperationError::Cancelled),
            }
        })
    }
}

/// One subscription to an operation's result stream.
pub struct ReplayStream<T> {
    shared: Arc<Mutex<SinkState<T>>>,
    position: usize,
    errored: bool,
}

impl<T: Clone> Stream for ReplayStream<T> {
    type Item = Result<T, OperationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut state = this.shared.lock();

        if this.position < state.items.len() {
            let value = state.items[this.position].clone();
            this.position += 1;
            return Poll::Ready(Some(Ok(value)));
        }

        match &state.terminal {
            Some(Ok(())) | Some(Err(OperationError::Cancelled)) => Poll::Ready(None),
            Some(Err(err)) => {
                if this.errored {
                    Poll::Ready(None)
                } else {
                    this.errored = true;
                    Poll::Ready(Some(Err(err.clone())))
                }
            }
            None => {
                state.register(cx.waker());
                Poll::Pending
            }
        }
    }
}

/// Future resolving with an operation's terminal state.
pub struct Termination<T> {
    shared: Arc<Mutex<SinkState<T>>>,
}

impl<T> Future for Termination<T> {
    type Output = Result<(), OperationError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        match &state.terminal {
            Some(result) => Poll::Ready(result.clone()),
            None => {
                state.register(cx.waker());
                Poll::Pending
            }
        }
    }
}

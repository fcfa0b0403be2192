//! Bounded-concurrency admission over the priority heap.
//!
//! The gate owns every piece of shared mutable state the dispatch loop
//! touches: the heap, the router, the in-flight count, the ceiling, the
//! pause count, and the shutdown flag. The facade guards the whole struct
//! with one mutex, which keeps submit/release/pause/resize/shutdown
//! linearizable and lets the drain loop re-check the ceiling and the heap
//! head without a double-admission window.

use hashbrown::HashMap;
use rand::Rng;
use rand::rngs::StdRng;

use crate::error::OperationError;
use crate::heap::PriorityHeap;
use crate::operation::{Launch, QueuedOperation};
use crate::router::KeyRouter;

/// One admission decision from the dispatch loop.
pub(crate) struct Admission {
    pub(crate) id: u64,
    pub(crate) priority: i32,
    /// `None` when the operation was parked behind its key channel; it still
    /// holds the slot it was admitted with.
    pub(crate) launch: Option<Launch>,
}

pub(crate) struct PriorityGate {
    pub(crate) heap: PriorityHeap<QueuedOperation>,
    pub(crate) router: KeyRouter,
    pub(crate) in_flight: usize,
    pub(crate) max_concurrent: usize,
    pub(crate) pause_count: usize,
    pub(crate) shutting_down: bool,
    rng: Option<StdRng>,
    /// Live random draws, one per key with operations still in the heap.
    /// Sharing the draw keeps the composite ordering a total order: same-key
    /// entries compare by id, never by conflicting random values.
    key_draws: HashMap<String, KeyDraw>,
    pub(crate) first_failure: Option<OperationError>,
}

struct KeyDraw {
    value: u64,
    resident: usize,
}

impl PriorityGate {
    pub(crate) fn new(max_concurrent: usize, rng: Option<StdRng>) -> Self {
        Self {
            heap: PriorityHeap::new(),
            router: KeyRouter::new(),
            in_flight: 0,
            max_concurrent,
            pause_count: 0,
            shutting_down: false,
            rng,
            key_draws: HashMap::new(),
            first_failure: None,
        }
    }

    /// Effective ceiling: zero while paused, the configured ceiling
    /// otherwise. Shutdown overrides pause so the drain can finish.
    pub(crate) fn effective_max(&self) -> usize {
        if self.shutting_down {
            self.max_concurrent
        } else if self.pause_count > 0 {
            0
        } else {
            self.max_concurrent
        }
    }

    /// Draws the submission-time tiebreak value, when randomization is on.
    /// Called under the gate lock so a fixed seed reproduces orderings.
    ///
    /// Keyed submissions reuse the draw of any same-key operation still in
    /// the heap; a fresh draw happens once the key has drained out. Unkeyed
    /// submissions always draw fresh.
    pub(crate) fn draw_random_order(&mut self, key: Option<&str>) -> Option<u64> {
        let rng = self.rng.as_mut()?;
        let Some(key) = key else {
            return Some(rng.random());
        };
        let draw = self
            .key_draws
            .entry_ref(key)
            .and_modify(|draw| draw.resident += 1)
            .or_insert_with(|| KeyDraw {
                value: rng.random(),
                resident: 1,
            });
        Some(draw.value)
    }

    /// Admits from the heap head until the ceiling is reached or the heap is
    /// empty. Every admission consumes one in-flight slot, including
    /// operations parked behind a busy key.
    pub(crate) fn dispatch(&mut self) -> Vec<Admission> {
        let mut admitted = Vec::new();
        while self.in_flight < self.effective_max() {
            let Some(op) = self.heap.pop() else {
                break;
            };
            self.note_popped(&op);
            self.in_flight += 1;
            let id = op.id;
            let priority = op.priority;
            let launch = self.router.admit(op.into_launch());
            admitted.push(Admission {
                id,
                priority,
                launch,
            });
        }
        admitted
    }

    // Retires the key's shared draw once its last heap entry leaves.
    fn note_popped(&mut self, op: &QueuedOperation) {
        if self.rng.is_none() {
            return;
        }
        let Some(key) = &op.key else {
            return;
        };
        if let Some(draw) = self.key_draws.get_mut(key) {
            draw.resident -= 1;
            if draw.resident == 0 {
                self.key_draws.remove(key);
            }
        }
    }

    /// Frees the slot held by a terminated operation and hands back the next
    /// same-key launch, if one was parked.
    pub(crate) fn release(&mut self, key: Option<&str>) -> Option<Launch> {
        debug_assert!(self.in_flight > 0, "release without a matching admission");
        self.in_flight -= 1;
        key.and_then(|k| self.router.on_terminated(k))
    }

    pub(crate) fn record_failure(&mut self, err: &OperationError) {
        if self.first_failure.is_none() {
            self.first_failure = Some(err.clone());
        }
    }

    /// True once shutdown is waiting on nothing: no queued work and no
    /// in-flight slots (parked operations count as in flight).
    pub(crate) fn drained(&self) -> bool {
        self.shutting_down && self.in_flight == 0 && self.heap.is_empty()
    }

    /// The result the shutdown handle resolves with once drained.
    pub(crate) fn shutdown_result(&self) -> Result<(), OperationError> {
        match &self.first_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

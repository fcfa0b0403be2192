//! Randomized-tiebreak determinism and FIFO stability.
//!
//! Mirrors the gate's submission-time draw discipline: one shared draw per
//! key while the key has entries in the heap, a fresh draw per unkeyed
//! entry. That keeps the composite ordering a total order, so FIFO within a
//! key can never be broken by the heap's internal moves.

use opqueue::{HeapOrder, PriorityHeap};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    priority: i32,
    key: Option<u8>,
    random_order: u64,
    id: u64,
}

impl HeapOrder for Entry {
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
        if self.random_order != other.random_order {
            return self.random_order < other.random_order;
        }
        self.id < other.id
    }
}

/// Builds entries the way the gate does: keyed submissions share the live
/// draw of their key, unkeyed submissions draw fresh.
fn build_entries(seed: u64, shape: &[(i32, Option<u8>)]) -> Vec<Entry> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut live_draws: [Option<u64>; 4] = [None; 4];
    shape
        .iter()
        .enumerate()
        .map(|(id, &(priority, key))| {
            let random_order = match key {
                None => rng.random(),
                Some(k) => {
                    let slot = &mut live_draws[k as usize];
                    *slot.get_or_insert_with(|| rng.random())
                }
            };
            Entry {
                priority,
                key,
                random_order,
                id: id as u64,
            }
        })
        .collect()
}

fn drain_ids(entries: Vec<Entry>) -> Vec<u64> {
    let mut heap = PriorityHeap::new();
    for entry in entries {
        heap.push(entry);
    }
    heap.drain_sorted().into_iter().map(|e| e.id).collect()
}

proptest! {
    #[test]
    fn seeded_draws_give_reproducible_orders(
        seed in any::<u64>(),
        shape in proptest::collection::vec(
            (-2i32..2, proptest::option::of(0u8..4)),
            1..50,
        ),
    ) {
        let first = drain_ids(build_entries(seed, &shape));
        let second = drain_ids(build_entries(seed, &shape));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn randomization_never_breaks_fifo_within_a_key(
        seed in any::<u64>(),
        shape in proptest::collection::vec(
            proptest::option::of(0u8..4).prop_map(|key| (5i32, key)),
            2..60,
        ),
    ) {
        let entries = build_entries(seed, &shape);
        let order = drain_ids(entries.clone());

        for key in 0u8..4 {
            let ids: Vec<u64> = order
                .iter()
                .copied()
                .filter(|id| entries[*id as usize].key == Some(key))
                .collect();
            prop_assert!(
                ids.windows(2).all(|w| w[0] < w[1]),
                "key {} dispatched out of order: {:?}",
                key,
                ids
            );
        }
    }

    #[test]
    fn unkeyed_entries_precede_keyed_ones_at_ties(
        seed in any::<u64>(),
        unkeyed in 1usize..10,
        keyed in 1usize..10,
    ) {
        let mut shape = Vec::new();
        for _ in 0..keyed {
            shape.push((5i32, Some(0u8)));
        }
        for _ in 0..unkeyed {
            shape.push((5i32, None));
        }

        let entries = build_entries(seed, &shape);
        let order = drain_ids(entries.clone());

        let last_unkeyed = order
            .iter()
            .rposition(|id| entries[*id as usize].key.is_none())
            .unwrap();
        let first_keyed = order
            .iter()
            .position(|id| entries[*id as usize].key.is_some())
            .unwrap();
        prop_assert!(last_unkeyed < first_keyed);
    }
}

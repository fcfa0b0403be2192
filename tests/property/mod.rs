//! Property-based coverage for the priority heap and its dispatch ordering.
//!
//! Test organization:
//! - heap.rs: heap invariant under arbitrary mutations, drain order
//! - ordering.rs: randomized-tiebreak determinism and FIFO stability

mod ordering;

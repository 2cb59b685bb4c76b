//! Canonical k-mer hash table — a minimum perfect hash over the vertex set
//! plus one atomic state cell per bucket.
//!
//! Updates go through a load/compare-and-swap pair: `load` snapshots a slot
//! together with the byte it observed, and `update` publishes a new state
//! only if the slot is unchanged since that snapshot. Losing a race is not an
//! error; it is how exactly-once segment emission is enforced.

use std::sync::atomic::{AtomicU8, Ordering};

use boomphf::Mphf;

use crate::state::State;

/// Minimum-perfect-hash load factor (boomphf convention).
const MPHF_GAMMA: f64 = 1.7;

/// Snapshot of one state slot plus the token needed to publish an update.
#[derive(Debug)]
pub struct StateHandle {
    bucket: usize,
    pub state: State,
    token: u8,
}

pub struct VertexTable {
    mphf: Mphf<u64>,
    slots: Vec<AtomicU8>,
}

impl VertexTable {
    /// Build the table over the distinct canonical k-mer set. The set should
    /// be sorted so bucket ids are reproducible across runs.
    pub fn new(vertices: &[u64]) -> Self {
        let mphf = Mphf::new(MPHF_GAMMA, vertices);
        let slots = (0..vertices.len()).map(|_| AtomicU8::new(0)).collect();
        VertexTable { mphf, slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Bucket index of a canonical k-mer. Total and deterministic for every
    /// k-mer of the build set; querying a foreign k-mer is a logic error.
    #[inline]
    pub fn bucket_id(&self, canonical: u64) -> u64 {
        self.mphf.hash(&canonical)
    }

    /// Snapshot the slot at `bucket`.
    #[inline]
    pub fn load(&self, bucket: u64) -> StateHandle {
        let raw = self.slots[bucket as usize].load(Ordering::Acquire);
        StateHandle {
            bucket: bucket as usize,
            state: State::from_bits(raw),
            token: raw,
        }
    }

    /// Try to publish `handle.state`. Returns false when another thread
    /// changed the slot since `load`; the handle is refreshed with the
    /// winning state so callers may recompute and retry.
    pub fn update(&self, handle: &mut StateHandle) -> bool {
        match self.slots[handle.bucket].compare_exchange(
            handle.token,
            handle.state.bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                handle.token = handle.state.bits();
                true
            }
            Err(observed) => {
                handle.state = State::from_bits(observed);
                handle.token = observed;
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SideObs;

    fn table_of(keys: &[u64]) -> VertexTable {
        let mut keys = keys.to_vec();
        keys.sort_unstable();
        VertexTable::new(&keys)
    }

    #[test]
    fn test_bucket_ids_are_a_permutation() {
        let keys = [3u64, 17, 92, 4000, 12345];
        let table = table_of(&keys);
        let mut buckets: Vec<u64> = keys.iter().map(|k| table.bucket_id(*k)).collect();
        buckets.sort_unstable();
        assert_eq!(buckets, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_update_publishes_state() {
        let table = table_of(&[7, 11]);
        let bucket = table.bucket_id(7);
        let mut h = table.load(bucket);
        h.state = h.state.observe_front(SideObs::Edge(2));
        assert!(table.update(&mut h));
        assert_eq!(table.load(bucket).state, h.state);
    }

    #[test]
    fn test_update_fails_on_stale_token() {
        let table = table_of(&[7, 11]);
        let bucket = table.bucket_id(7);
        let mut first = table.load(bucket);
        let mut second = table.load(bucket);
        first.state = first.state.outputted();
        assert!(table.update(&mut first));

        second.state = second.state.outputted();
        // The slot moved underneath; the handle comes back refreshed.
        assert!(!table.update(&mut second));
        assert!(second.state.is_outputted());
    }

    #[test]
    fn test_exactly_one_winner_under_contention() {
        let keys: Vec<u64> = (0..64).collect();
        let table = table_of(&keys);
        let wins = std::sync::atomic::AtomicU64::new(0);

        crossbeam::scope(|s| {
            for _ in 0..8 {
                s.spawn(|_| {
                    for key in &keys {
                        let mut h = table.load(table.bucket_id(*key));
                        if !h.state.is_outputted() {
                            h.state = h.state.outputted();
                            if table.update(&mut h) {
                                wins.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(wins.load(Ordering::Relaxed), keys.len() as u64);
    }
}

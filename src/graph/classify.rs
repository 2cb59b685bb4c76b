//! Graph construction — vertex enumeration and DFA-state computation.
//!
//! Two streaming passes over the input precede extraction. The first
//! collects the distinct canonical k-mer set (sorted, so the perfect hash
//! and with it every unitig id is reproducible across runs and thread
//! counts). The second feeds each k-mer occurrence's observed left/right
//! edges through the per-side automata; a sequence boundary or placeholder
//! neighbor drives the side to branching. Updates race through the table's
//! load/CAS pair and retry on loss, so shards need no other coordination.

use ahash::AHashSet;
use anyhow::{anyhow, Result};
use tracing::info;

use crate::io::fastx::FastxSource;
use crate::kmer::{base_code, complement, is_placeholder, KmerWindows, FWD};
use crate::state::SideObs;
use crate::table::VertexTable;

/// Collect the distinct canonical k-mers of the input, sorted ascending.
pub fn enumerate_vertices(paths: &[String], k: usize) -> Result<Vec<u64>> {
    let mut set: AHashSet<u64> = AHashSet::new();
    let mut source = FastxSource::open(paths)?;
    let mut seq_count = 0u64;
    while let Some(rec) = source.next_record()? {
        seq_count += 1;
        if rec.seq.len() < k {
            continue;
        }
        for (_, dk) in KmerWindows::new(&rec.seq, 0, rec.seq.len() - k, k) {
            set.insert(dk.canonical());
        }
    }

    let mut vertices: Vec<u64> = set.into_iter().collect();
    vertices.sort_unstable();
    info!(
        "{} sequences scanned, {} distinct vertices",
        seq_count,
        vertices.len()
    );
    Ok(vertices)
}

/// Run every k-mer occurrence of the input through the per-side automata.
/// After this pass the vertex classes are final; extraction only flips
/// outputted bits.
pub fn compute_states(
    paths: &[String],
    k: usize,
    thread_count: usize,
    table: &VertexTable,
) -> Result<()> {
    let mut source = FastxSource::open(paths)?;
    while let Some(rec) = source.next_record()? {
        if rec.seq.len() < k {
            continue;
        }
        classify_sequence(&rec.seq, k, thread_count, table)?;
    }
    Ok(())
}

fn classify_sequence(seq: &[u8], k: usize, thread_count: usize, table: &VertexTable) -> Result<()> {
    let ranges = super::partition(seq.len(), k, thread_count);
    crossbeam::scope(|s| {
        for &(left, right) in &ranges {
            s.spawn(move |_| classify_range(seq, left, right, k, table));
        }
    })
    .map_err(|_| anyhow!("early termination of a worker thread during state computation"))?;
    Ok(())
}

fn classify_range(seq: &[u8], left: usize, right: usize, k: usize, table: &VertexTable) {
    for (idx, dk) in KmerWindows::new(seq, left, right, k) {
        let left_base = (idx > 0 && !is_placeholder(seq[idx - 1])).then(|| seq[idx - 1]);
        let right_base =
            (idx + k < seq.len() && !is_placeholder(seq[idx + k])).then(|| seq[idx + k]);

        // Map the occurrence's sides onto the canonical orientation: a BWD
        // occurrence enters through the canonical back, with complemented
        // edge labels.
        let (front_obs, back_obs) = if dk.dir() == FWD {
            (side_obs(left_base), side_obs(right_base))
        } else {
            (
                side_obs(right_base.map(complement)),
                side_obs(left_base.map(complement)),
            )
        };

        observe(table, dk.canonical(), front_obs, back_obs);
    }
}

fn side_obs(base: Option<u8>) -> SideObs {
    match base.and_then(base_code) {
        Some(code) => SideObs::Edge(code),
        None => SideObs::Open,
    }
}

/// Fold one occurrence's observations into the vertex's state cell,
/// retrying until the CAS lands or the cell already subsumes them.
fn observe(table: &VertexTable, canonical: u64, front: SideObs, back: SideObs) {
    let bucket = table.bucket_id(canonical);
    let mut handle = table.load(bucket);
    loop {
        let updated = handle.state.observe_front(front).observe_back(back);
        if updated == handle.state {
            return;
        }
        handle.state = updated;
        if table.update(&mut handle) {
            return;
        }
        // Lost the race; the handle now holds the winner's state.
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

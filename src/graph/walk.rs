//! Maximal-unitig walker — per-shard sweep over one input sequence.
//!
//! Each worker sweeps the k-mer start indices of its shard `[left, right]`.
//! A unitig whose leftmost k-mer falls inside the shard is walked to its
//! natural end even past `right`; a shard entered mid-unitig can never
//! satisfy the start predicate at its left edge, so every unitig is walked by
//! exactly one shard. Segment dedup across sequences and repeat occurrences
//! is the hash table's outputted CAS, handled at emission.

use anyhow::Result;

use super::output::ThreadOutput;
use crate::kmer::{is_placeholder, search_valid_kmer, AnnotatedKmer};
use crate::state::{is_unipath_end, is_unipath_start};
use crate::table::VertexTable;

/// Sweep the shard `[left, right]` of `seq`, emitting every maximal unitig
/// whose leftmost k-mer lies in the shard.
pub fn walk_substring(
    seq: &[u8],
    left: usize,
    right: usize,
    k: usize,
    table: &VertexTable,
    out: &mut ThreadOutput,
) -> Result<()> {
    let mut idx = left;
    while idx <= right {
        idx = search_valid_kmer(seq, idx, right, k);
        if idx > right {
            break;
        }
        idx = walk_maximal_run(seq, right, idx, k, table, out)?;
    }
    Ok(())
}

/// Process the maximal placeholder-free run beginning at `start_idx`,
/// emitting the maximal unitigs it contains; returns the index past the run.
fn walk_maximal_run(
    seq: &[u8],
    right: usize,
    start_idx: usize,
    k: usize,
    table: &VertexTable,
    out: &mut ThreadOutput,
) -> Result<usize> {
    let seq_len = seq.len();
    let mut idx = start_idx;
    let mut curr = AnnotatedKmer::new(seq, idx, k, table);

    let left_open = idx == 0 || is_placeholder(seq[idx - 1]);
    let right_open = idx + k == seq_len || is_placeholder(seq[idx + k]);

    // An isolated k-mer is a maximal unitig by itself.
    if left_open && right_open {
        out.emit(seq, &curr, &curr, table)?;
        return Ok(idx + k);
    }

    // The run is a single k-mer with only a left neighbor.
    if right_open {
        let prev = AnnotatedKmer::new(seq, idx - 1, k, table);
        if is_unipath_start(curr.class, curr.dir(), prev.class, prev.dir()) {
            out.emit(seq, &curr, &curr, table)?;
        }
        return Ok(idx + k);
    }

    // A valid right neighbor exists.
    let mut next = curr;
    next.roll(seq[idx + k], table);

    let mut on_unipath = false;
    let mut unipath_start = curr;

    if left_open {
        // A maximal unitig starts at the beginning of a valid run.
        on_unipath = true;
    } else {
        let prev = AnnotatedKmer::new(seq, idx - 1, k, table);
        if is_unipath_start(curr.class, curr.dir(), prev.class, prev.dir()) {
            on_unipath = true;
        }
    }

    if on_unipath && is_unipath_end(curr.class, curr.dir(), next.class, next.dir()) {
        out.emit(seq, &unipath_start, &curr, table)?;
        on_unipath = false;
    }

    // Remaining k-mers of the run. An open unitig keeps the loop alive past
    // `right` until its natural end.
    idx += 1;
    while on_unipath || idx <= right {
        let prev = curr;
        curr = next;

        if is_unipath_start(curr.class, curr.dir(), prev.class, prev.dir()) {
            on_unipath = true;
            unipath_start = curr;
        }

        if idx + k == seq_len || is_placeholder(seq[idx + k]) {
            // The valid run ends at this k-mer.
            if on_unipath {
                out.emit(seq, &unipath_start, &curr, table)?;
            }
            return Ok(idx + k);
        }

        next.roll(seq[idx + k], table);
        if on_unipath && is_unipath_end(curr.class, curr.dir(), next.class, next.dir()) {
            out.emit(seq, &unipath_start, &curr, table)?;
            on_unipath = false;
        }
        idx += 1;
    }

    Ok(idx + k)
}

//! Shard stitching — links across thread boundaries and the per-sequence
//! GFA path record.
//!
//! Workers never see each other's unitigs, so the links that span shard
//! boundaries are resolved after the join barrier from the `first` / `last`
//! witnesses, and the P-record is assembled from the head witnesses plus the
//! concatenated per-thread spools. A boundary link's path fragment belongs
//! to the left shard's spool, which keeps the concatenation in tiling order.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::output::{OrientedUnitig, ThreadOutput};
use crate::io::sink::SinkHandle;

/// Emit the links that cross shard boundaries. Scans threads in ascending
/// order, linking each shard's last unitig to the next non-empty shard's
/// first one.
pub fn write_inter_thread_links(outputs: &mut [ThreadOutput]) -> Result<()> {
    let mut left: Option<(OrientedUnitig, usize)> = None;
    for t in 0..outputs.len() {
        match left {
            None => {
                if let Some(last) = outputs[t].last() {
                    left = Some((last, t));
                }
            }
            Some((left_unitig, left_t)) => {
                if let Some(first) = outputs[t].first() {
                    outputs[t].write_link(&left_unitig, &first)?;
                    outputs[left_t].append_link_to_path(&left_unitig, &first)?;
                    // A shard with a first unitig necessarily has a last one.
                    if let Some(last) = outputs[t].last() {
                        left = Some((last, t));
                    }
                }
            }
        }
    }
    Ok(())
}

/// The sequence's first and second oriented unitigs across all shards; the
/// one link not recoverable from the spools.
fn search_first_link(
    outputs: &[ThreadOutput],
) -> (Option<OrientedUnitig>, Option<OrientedUnitig>) {
    let mut head = None;
    for out in outputs {
        if let Some(first) = out.first() {
            if head.is_none() {
                head = Some(first);
            } else {
                return (head, Some(first));
            }
        }
        if let Some(second) = out.second() {
            // A second witness implies a first on the same thread, so the
            // head is set by now.
            return (head, Some(second));
        }
    }
    (head, None)
}

/// Assemble and append the P-record for sequence number `seq_no`. Emits
/// nothing when the sequence produced no unitig.
pub fn write_path(
    outputs: &mut [ThreadOutput],
    seq_no: u64,
    k: usize,
    sink: &SinkHandle,
) -> Result<()> {
    // Close the spools first; deferred write failures surface here.
    for out in outputs.iter_mut() {
        out.finish_spools()?;
    }

    let (head, second) = search_first_link(outputs);
    let head = match head {
        Some(h) => h,
        None => return Ok(()),
    };

    let mut record = Vec::new();
    write!(record, "P\tP{}\t{}{}", seq_no, head.id, head.sign())?;
    for out in outputs.iter() {
        if let Some(path) = out.path_spool_path() {
            append_file(&mut record, path)?;
        }
    }

    record.push(b'\t');
    match second {
        // A lone unitig gets an empty overlaps field.
        None => record.push(b'*'),
        Some(second) => {
            write!(record, "{}M", head.overlap_with(&second, k))?;
            for out in outputs.iter() {
                if let Some(path) = out.overlap_spool_path() {
                    append_file(&mut record, path)?;
                }
            }
        }
    }
    record.push(b'\n');

    sink.write(record)?;
    Ok(())
}

fn append_file(buf: &mut Vec<u8>, path: &Path) -> Result<()> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("cannot open temporary path file {}", path.display()))?;
    file.read_to_end(buf)
        .with_context(|| format!("reading temporary path file {}", path.display()))?;
    Ok(())
}

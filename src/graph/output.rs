//! Per-thread emission state — segment/link buffers, path spools, shard
//! witnesses, and the GFA record formatters.
//!
//! Each worker owns one `ThreadOutput`. Segment and link lines accumulate in
//! a private buffer that is handed to the shared sink when it crosses the
//! configured threshold, so flushes preserve intra-thread order without any
//! cross-thread coordination. Path and overlap fragments go to per-thread
//! spool files that the stitcher concatenates into the P-record afterwards.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use super::OutputFormat;
use crate::io::sink::SinkHandle;
use crate::kmer::{complement, AnnotatedKmer, Direction, FWD};
use crate::table::VertexTable;

/// File-name stems for the per-thread spool files in the working directory.
pub const PATH_SPOOL_PREFIX: &str = "cdbg.path";
pub const OVERLAP_SPOOL_PREFIX: &str = "cdbg.overlap";

// ---------------------------------------------------------------------------
// OrientedUnitig
// ---------------------------------------------------------------------------

/// An oriented maximal unitig, as witnessed at one emission site.
///
/// The id is the hash-table bucket of the lexicographically smaller flanking
/// canonical k-mer, so every thread that meets this unitig names it the same
/// way. The orientation follows the canonical spelling rule, not the
/// traversal direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrientedUnitig {
    pub id: u64,
    pub dir: Direction,
    pub start_kmer_idx: usize,
    pub end_kmer_idx: usize,
}

impl OrientedUnitig {
    pub fn sign(&self) -> char {
        if self.dir == FWD {
            '+'
        } else {
            '-'
        }
    }

    /// Overlap in bases with `right` following on the same sequence: `k - 1`
    /// when the flanking k-mers are index-adjacent, `0` across a placeholder
    /// gap.
    pub fn overlap_with(&self, right: &OrientedUnitig, k: usize) -> usize {
        if right.start_kmer_idx == self.end_kmer_idx + 1 {
            k - 1
        } else {
            0
        }
    }
}

// ---------------------------------------------------------------------------
// ThreadOutput
// ---------------------------------------------------------------------------

/// GFA-specific per-thread state: the path/overlap spools and the witnesses
/// the stitcher reads after the join barrier.
struct GfaState {
    path_spool: BufWriter<File>,
    overlap_spool: BufWriter<File>,
    path_spool_path: PathBuf,
    overlap_spool_path: PathBuf,
    first: Option<OrientedUnitig>,
    second: Option<OrientedUnitig>,
    last: Option<OrientedUnitig>,
}

/// Output state owned by one worker thread for one input sequence.
pub struct ThreadOutput {
    t_id: usize,
    k: usize,
    format: OutputFormat,
    sink: SinkHandle,
    buf: Vec<u8>,
    buffer_cap: usize,
    unitigs_emitted: u64,
    bases_emitted: u64,
    gfa: Option<GfaState>,
}

impl ThreadOutput {
    pub fn new(
        t_id: usize,
        k: usize,
        format: OutputFormat,
        work_dir: &Path,
        buffer_cap: usize,
        sink: SinkHandle,
    ) -> Result<Self> {
        let gfa = match format {
            OutputFormat::Gfa => Some(GfaState::open(t_id, work_dir)?),
            OutputFormat::Fasta => None,
        };
        Ok(ThreadOutput {
            t_id,
            k,
            format,
            sink,
            buf: Vec::new(),
            buffer_cap,
            unitigs_emitted: 0,
            bases_emitted: 0,
            gfa,
        })
    }

    /// Record one emitted unitig occurrence flanked by `start` and `end`:
    /// an S-record if this thread wins the outputted race, plus link,
    /// witness, and path-spool bookkeeping.
    pub fn emit(
        &mut self,
        seq: &[u8],
        start: &AnnotatedKmer,
        end: &AnnotatedKmer,
        table: &VertexTable,
    ) -> Result<()> {
        // Both flanks identify the unitig; always querying the smaller
        // canonical flank keeps the id independent of traversal direction.
        let min_flank = start.canonical().min(end.canonical());
        let bucket = table.bucket_id(min_flank);

        let current = OrientedUnitig {
            id: bucket,
            dir: start.fw() < end.rc(),
            start_kmer_idx: start.idx,
            end_kmer_idx: end.idx,
        };

        let mut handle = table.load(bucket);
        if !handle.state.is_outputted() {
            handle.state = handle.state.outputted();
            // Only the thread whose update lands may write the segment; a
            // failed swap means another thread already owns it.
            if table.update(&mut handle) {
                self.write_segment(seq, &current)?;
            }
        }

        let prev = match self.gfa.as_mut() {
            Some(g) => {
                if g.first.is_none() {
                    g.first = Some(current);
                } else if g.second.is_none() {
                    g.second = Some(current);
                }
                let prev = g.last;
                g.last = Some(current);
                prev
            }
            None => None,
        };
        if let Some(prev) = prev {
            self.write_link(&prev, &current)?;
            self.append_link_to_path(&prev, &current)?;
        }
        Ok(())
    }

    fn write_segment(&mut self, seq: &[u8], u: &OrientedUnitig) -> Result<()> {
        let len = u.end_kmer_idx - u.start_kmer_idx + self.k;
        match self.format {
            OutputFormat::Gfa => {
                let kc = u.end_kmer_idx - u.start_kmer_idx + 1;
                write!(self.buf, "S\t{}\t", u.id)?;
                self.push_spelling(seq, u);
                writeln!(self.buf, "\tLN:i:{len}\tKC:i:{kc}")?;
            }
            OutputFormat::Fasta => {
                writeln!(self.buf, ">{}", u.id)?;
                self.push_spelling(seq, u);
                self.buf.push(b'\n');
            }
        }
        self.unitigs_emitted += 1;
        self.bases_emitted += len as u64;
        self.check_flush()
    }

    /// The unitig's spelling in its own orientation: FWD spells the covered
    /// range of the sequence, BWD its reverse complement.
    fn push_spelling(&mut self, seq: &[u8], u: &OrientedUnitig) {
        let range = &seq[u.start_kmer_idx..u.end_kmer_idx + self.k];
        if u.dir == FWD {
            self.buf.extend_from_slice(range);
        } else {
            for &b in range.iter().rev() {
                self.buf.push(complement(b));
            }
        }
    }

    /// Append an L-record connecting two consecutively placed unitigs.
    pub fn write_link(&mut self, left: &OrientedUnitig, right: &OrientedUnitig) -> Result<()> {
        writeln!(
            self.buf,
            "L\t{}\t{}\t{}\t{}\t{}M",
            left.id,
            left.sign(),
            right.id,
            right.sign(),
            left.overlap_with(right, self.k)
        )?;
        self.check_flush()
    }

    /// Spool the link's destination and overlap for later path assembly. The
    /// path tiling's very first vertex is deliberately absent here; the
    /// stitcher recovers it from the witnesses.
    pub fn append_link_to_path(
        &mut self,
        left: &OrientedUnitig,
        right: &OrientedUnitig,
    ) -> Result<()> {
        let k = self.k;
        if let Some(g) = self.gfa.as_mut() {
            write!(g.path_spool, ",{}{}", right.id, right.sign())?;
            write!(g.overlap_spool, ",{}M", left.overlap_with(right, k))?;
        }
        Ok(())
    }

    pub fn first(&self) -> Option<OrientedUnitig> {
        self.gfa.as_ref().and_then(|g| g.first)
    }

    pub fn second(&self) -> Option<OrientedUnitig> {
        self.gfa.as_ref().and_then(|g| g.second)
    }

    pub fn last(&self) -> Option<OrientedUnitig> {
        self.gfa.as_ref().and_then(|g| g.last)
    }

    pub fn unitigs_emitted(&self) -> u64 {
        self.unitigs_emitted
    }

    pub fn bases_emitted(&self) -> u64 {
        self.bases_emitted
    }

    fn check_flush(&mut self) -> Result<()> {
        if self.buf.len() >= self.buffer_cap {
            self.flush_buf()?;
        }
        Ok(())
    }

    /// Hand the buffered records to the shared sink.
    pub fn flush_buf(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.sink.write(std::mem::take(&mut self.buf))?;
        }
        Ok(())
    }

    /// Flush the spool files; write failures deferred by the buffered
    /// writers surface here.
    pub fn finish_spools(&mut self) -> Result<()> {
        if let Some(g) = self.gfa.as_mut() {
            g.path_spool.flush().with_context(|| {
                format!("writing temporary path file (thread {})", self.t_id)
            })?;
            g.overlap_spool.flush().with_context(|| {
                format!("writing temporary overlap file (thread {})", self.t_id)
            })?;
        }
        Ok(())
    }

    pub fn path_spool_path(&self) -> Option<&Path> {
        self.gfa.as_ref().map(|g| g.path_spool_path.as_path())
    }

    pub fn overlap_spool_path(&self) -> Option<&Path> {
        self.gfa.as_ref().map(|g| g.overlap_spool_path.as_path())
    }

    /// Delete the spool files. Failure is reported and swallowed; stale
    /// temporaries do not invalidate the run's output.
    pub fn remove_spools(&self) {
        if let Some(g) = self.gfa.as_ref() {
            for path in [&g.path_spool_path, &g.overlap_spool_path] {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!("cannot delete temporary file {}: {e}", path.display());
                }
            }
        }
    }
}

impl GfaState {
    fn open(t_id: usize, work_dir: &Path) -> Result<Self> {
        let path_spool_path = work_dir.join(format!("{PATH_SPOOL_PREFIX}.{t_id}"));
        let overlap_spool_path = work_dir.join(format!("{OVERLAP_SPOOL_PREFIX}.{t_id}"));
        let path_spool = File::create(&path_spool_path).with_context(|| {
            format!(
                "cannot open temporary path file {}",
                path_spool_path.display()
            )
        })?;
        let overlap_spool = File::create(&overlap_spool_path).with_context(|| {
            format!(
                "cannot open temporary overlap file {}",
                overlap_spool_path.display()
            )
        })?;
        Ok(GfaState {
            path_spool: BufWriter::new(path_spool),
            overlap_spool: BufWriter::new(overlap_spool),
            path_spool_path,
            overlap_spool_path,
            first: None,
            second: None,
            last: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sink::OutputSink;
    use crate::state::SideObs;

    /// A table over the canonical vertices of `seq`, classified so that the
    /// formatting under test sees realistic states.
    fn table_for(seq: &[u8], k: usize) -> VertexTable {
        let mut keys: Vec<u64> = crate::kmer::KmerWindows::new(seq, 0, seq.len() - k, k)
            .map(|(_, dk)| dk.canonical())
            .collect();
        keys.sort_unstable();
        keys.dedup();
        let table = VertexTable::new(&keys);
        for key in &keys {
            let mut h = table.load(table.bucket_id(*key));
            h.state = h
                .state
                .observe_front(SideObs::Open)
                .observe_back(SideObs::Open);
            assert!(table.update(&mut h));
        }
        table
    }

    fn emit_single(seq: &[u8], k: usize, format: OutputFormat) -> String {
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.txt");
        let sink = OutputSink::create(&out_path).unwrap();
        let table = table_for(seq, k);

        let mut out =
            ThreadOutput::new(0, k, format, dir.path(), 1 << 20, sink.handle()).unwrap();
        let start = AnnotatedKmer::new(seq, 0, k, &table);
        let mut end = start;
        for idx in 1..=seq.len() - k {
            end.roll(seq[idx + k - 1], &table);
        }
        out.emit(seq, &start, &end, &table).unwrap();
        out.flush_buf().unwrap();
        out.remove_spools();
        drop(out);
        sink.finish().unwrap();
        std::fs::read_to_string(&out_path).unwrap()
    }

    #[test]
    fn test_segment_line_forward() {
        // start ACC < end.rev_compl TAG, so the unitig reads forward.
        let line = emit_single(b"ACCTA", 3, OutputFormat::Gfa);
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], "S");
        assert_eq!(fields[2], "ACCTA");
        assert_eq!(fields[3], "LN:i:5");
        assert_eq!(fields[4], "KC:i:3");
    }

    #[test]
    fn test_segment_line_backward_spells_revcomp() {
        // start TTG vs end.rev_compl CAA: backward, spelled as revcomp.
        let line = emit_single(b"TTGG", 3, OutputFormat::Gfa);
        assert!(line.starts_with("S\t"));
        assert!(line.contains("\tCCAA\t"), "got: {line}");
        assert!(line.ends_with("\tLN:i:4\tKC:i:2\n"));
    }

    #[test]
    fn test_fasta_record() {
        let record = emit_single(b"ACCTA", 3, OutputFormat::Fasta);
        let mut lines = record.lines();
        assert!(lines.next().unwrap().starts_with('>'));
        assert_eq!(lines.next().unwrap(), "ACCTA");
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_link_line_and_overlap() {
        let a = OrientedUnitig {
            id: 4,
            dir: FWD,
            start_kmer_idx: 0,
            end_kmer_idx: 2,
        };
        let b = OrientedUnitig {
            id: 9,
            dir: crate::kmer::BWD,
            start_kmer_idx: 3,
            end_kmer_idx: 5,
        };
        assert_eq!(a.overlap_with(&b, 5), 4);
        let gap = OrientedUnitig {
            start_kmer_idx: 7,
            ..b
        };
        assert_eq!(a.overlap_with(&gap, 5), 0);

        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.gfa");
        let sink = OutputSink::create(&out_path).unwrap();
        let mut out = ThreadOutput::new(
            0,
            5,
            OutputFormat::Gfa,
            dir.path(),
            1 << 20,
            sink.handle(),
        )
        .unwrap();
        out.write_link(&a, &b).unwrap();
        out.write_link(&a, &gap).unwrap();
        out.flush_buf().unwrap();
        out.remove_spools();
        drop(out);
        sink.finish().unwrap();

        let content = std::fs::read_to_string(&out_path).unwrap();
        assert_eq!(content, "L\t4\t+\t9\t-\t4M\nL\t4\t+\t9\t-\t0M\n");
    }

    #[test]
    fn test_duplicate_emission_is_suppressed() {
        let seq = b"ACCTA";
        let k = 3;
        let dir = tempfile::tempdir().unwrap();
        let out_path = dir.path().join("out.gfa");
        let sink = OutputSink::create(&out_path).unwrap();
        let table = table_for(seq, k);

        let mut out = ThreadOutput::new(
            0,
            k,
            OutputFormat::Gfa,
            dir.path(),
            1 << 20,
            sink.handle(),
        )
        .unwrap();
        let start = AnnotatedKmer::new(seq, 0, k, &table);
        let mut end = start;
        end.roll(seq[3], &table);
        end.roll(seq[4], &table);
        out.emit(seq, &start, &end, &table).unwrap();
        out.emit(seq, &start, &end, &table).unwrap();
        out.flush_buf().unwrap();
        out.remove_spools();
        let emitted = out.unitigs_emitted();
        drop(out);
        sink.finish().unwrap();

        let content = std::fs::read_to_string(&out_path).unwrap();
        // One S-record despite two emissions, and one link between the
        // repeated occurrences.
        assert_eq!(content.matches("S\t").count(), 1);
        assert_eq!(content.matches("L\t").count(), 1);
        assert_eq!(emitted, 1);
    }
}

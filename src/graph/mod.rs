//! Compacted de Bruijn graph driver — phases, sharding, and the
//! per-sequence emission loop.
//!
//! A run has three phases over the same input: vertex enumeration, DFA-state
//! computation, and unitig extraction. Extraction shards each sequence's
//! k-mer index range across scoped worker threads; after the join barrier
//! the stitcher resolves shard-boundary links and appends the sequence's
//! path record.

pub mod classify;
pub mod info;
pub mod output;
pub mod stitch;
pub mod walk;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;

use crate::io::fastx::FastxSource;
use crate::io::sink::{OutputSink, SinkHandle};
use crate::kmer::MAX_K;
use crate::table::VertexTable;
use output::ThreadOutput;

/// Output form for extracted unitigs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// GFA 1.0: segments, links, and one path record per input sequence.
    Gfa,
    /// Plain FASTA of the maximal unitigs.
    Fasta,
}

/// Run parameters for cdBG construction and unitig extraction.
#[derive(Debug, Clone)]
pub struct Config {
    pub input_paths: Vec<String>,
    pub output_path: PathBuf,
    pub k: usize,
    pub thread_count: usize,
    pub work_dir: PathBuf,
    pub buffer_cap: usize,
    pub format: OutputFormat,
}

/// Summary counters accumulated over the extraction phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractionStats {
    pub sequence_count: u64,
    pub unitig_count: u64,
    pub total_unitig_len: u64,
}

pub const GFA_HEADER: &str = "H\tVN:Z:1.0";

/// Default per-thread output-buffer flush threshold (bytes).
pub const DEFAULT_BUFFER_CAP: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config: &Config) -> Result<()> {
    validate(config)?;
    let t_start = std::time::Instant::now();

    info!("Enumerating the vertices of the de Bruijn graph");
    let vertices = classify::enumerate_vertices(&config.input_paths, config.k)?;

    if vertices.is_empty() {
        info!("No valid k-mers in the input; writing an empty output");
        let sink = OutputSink::create(&config.output_path)?;
        if config.format == OutputFormat::Gfa {
            sink.handle().write(format!("{GFA_HEADER}\n").into_bytes())?;
        }
        sink.finish()?;
        info::write_build_info(config, 0, &ExtractionStats::default())?;
        return Ok(());
    }

    info!("Constructing the minimal perfect hash over the vertex set");
    let table = VertexTable::new(&vertices);

    info!("Computing the DFA states");
    classify::compute_states(&config.input_paths, config.k, config.thread_count, &table)?;

    info!("Extracting the maximal unitigs");
    let stats = extract_unitigs(config, &table)?;
    info!(
        "{} maximal unitigs, {} bases",
        stats.unitig_count, stats.total_unitig_len
    );

    info::write_build_info(config, vertices.len() as u64, &stats)?;
    info!("Done. Time taken = {:.2} s", t_start.elapsed().as_secs_f64());
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.k < 3 || config.k > MAX_K || config.k % 2 == 0 {
        bail!(
            "k must be an odd integer in [3, {MAX_K}] (got {})",
            config.k
        );
    }
    if config.thread_count == 0 {
        bail!("thread count must be positive");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

fn extract_unitigs(config: &Config, table: &VertexTable) -> Result<ExtractionStats> {
    let sink = OutputSink::create(&config.output_path)?;
    let handle = sink.handle();
    if config.format == OutputFormat::Gfa {
        handle.write(format!("{GFA_HEADER}\n").into_bytes())?;
    }

    let mut stats = ExtractionStats::default();
    let mut source = FastxSource::open(&config.input_paths)?;
    let mut seq_no = 0u64;
    while let Some(rec) = source.next_record()? {
        seq_no += 1;
        info!(
            "Processing sequence {} ({}, length {})",
            seq_no,
            rec.name,
            rec.seq.len()
        );
        if rec.seq.len() < config.k {
            continue;
        }
        process_sequence(config, table, &handle, &rec.seq, seq_no, &mut stats)?;
    }
    stats.sequence_count = seq_no;

    handle.flush()?;
    drop(handle);
    sink.finish()?;
    Ok(stats)
}

/// Extract and emit the maximal unitigs of one sequence, sharded across
/// worker threads.
fn process_sequence(
    config: &Config,
    table: &VertexTable,
    sink: &SinkHandle,
    seq: &[u8],
    seq_no: u64,
    stats: &mut ExtractionStats,
) -> Result<()> {
    let k = config.k;
    let ranges = partition(seq.len(), k, config.thread_count);

    let mut outputs = Vec::with_capacity(ranges.len());
    for t in 0..ranges.len() {
        outputs.push(ThreadOutput::new(
            t,
            k,
            config.format,
            &config.work_dir,
            config.buffer_cap,
            sink.clone(),
        )?);
    }

    let join_results = crossbeam::scope(|s| {
        let mut handles = Vec::with_capacity(outputs.len());
        for (&(left, right), out) in ranges.iter().zip(outputs.iter_mut()) {
            handles.push(s.spawn(move |_| walk::walk_substring(seq, left, right, k, table, out)));
        }
        handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
    })
    .map_err(|_| anyhow!("early termination of a worker thread (sequence {seq_no})"))?;

    for (t, joined) in join_results.into_iter().enumerate() {
        match joined {
            Ok(res) => {
                res.with_context(|| format!("worker thread {t} failed on sequence {seq_no}"))?
            }
            Err(_) => bail!("early termination of worker thread {t} on sequence {seq_no}"),
        }
    }

    if config.format == OutputFormat::Gfa {
        stitch::write_inter_thread_links(&mut outputs)?;
    }

    // Flush worker buffers in thread order; the path record rides the same
    // FIFO sink, so it lands after every segment and link of this sequence.
    for out in outputs.iter_mut() {
        out.flush_buf()?;
    }
    if config.format == OutputFormat::Gfa {
        stitch::write_path(&mut outputs, seq_no, k, sink)?;
    }

    for out in &outputs {
        stats.unitig_count += out.unitigs_emitted();
        stats.total_unitig_len += out.bases_emitted();
    }
    for out in &outputs {
        out.remove_spools();
    }
    Ok(())
}

/// Contiguous k-mer index ranges `(left, right)` (inclusive) covering
/// `[0, len - k]`, one per worker; the last range absorbs the remainder.
/// Degenerates to one range when there are fewer windows than workers.
pub fn partition(seq_len: usize, k: usize, thread_count: usize) -> Vec<(usize, usize)> {
    let last = seq_len - k;
    let task_size = (last + 1) / thread_count;
    if task_size == 0 {
        return vec![(0, last)];
    }
    let mut ranges = Vec::with_capacity(thread_count);
    let mut left = 0;
    for t in 0..thread_count {
        let right = if t == thread_count - 1 {
            last
        } else {
            left + task_size - 1
        };
        ranges.push((left, right));
        left += task_size;
    }
    ranges
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

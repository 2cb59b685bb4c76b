//! Build-info JSON — run parameters and summary statistics, written next to
//! the main output.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::{Config, ExtractionStats, OutputFormat};

pub fn write_build_info(
    config: &Config,
    vertex_count: u64,
    stats: &ExtractionStats,
) -> Result<()> {
    let info = serde_json::json!({
        "cdbg_rs_version": crate::VERSION,
        "k": config.k,
        "thread_count": config.thread_count,
        "input": config.input_paths,
        "output": config.output_path.display().to_string(),
        "format": match config.format {
            OutputFormat::Gfa => "gfa",
            OutputFormat::Fasta => "fasta",
        },
        "sequence_count": stats.sequence_count,
        "vertex_count": vertex_count,
        "unitig_count": stats.unitig_count,
        "total_unitig_length": stats.total_unitig_len,
    });

    let path = PathBuf::from(format!("{}.json", config.output_path.display()));
    let file = File::create(&path)
        .with_context(|| format!("cannot open build-info file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &info)
        .with_context(|| format!("writing build-info file {}", path.display()))?;
    Ok(())
}

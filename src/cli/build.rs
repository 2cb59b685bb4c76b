use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::graph::{self, Config, OutputFormat, DEFAULT_BUFFER_CAP};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Input FASTA/FASTQ file(s), optionally gzip/zstd compressed
    #[arg(short = 'i', long, required = true, num_args = 1..)]
    pub input: Vec<String>,
    /// Output file path (truncated at start)
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// K-mer length (odd, at most 31)
    #[arg(short = 'k', long)]
    pub klen: usize,
    /// Number of threads (0 = all cores)
    #[arg(short = 't', long, default_value = "0")]
    pub threads: usize,
    /// Output format
    #[arg(long, value_enum, default_value = "gfa")]
    pub format: OutputFormat,
    /// Working directory for temporary per-thread path files
    #[arg(short = 'w', long, default_value = ".")]
    pub work_dir: PathBuf,
    /// Per-thread output buffer capacity in bytes before auto-flush
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAP)]
    pub buffer_cap: usize,
}

pub fn run(args: BuildArgs) -> Result<()> {
    let thread_count = if args.threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        args.threads
    };

    let config = Config {
        input_paths: args.input,
        output_path: args.output,
        k: args.klen,
        thread_count,
        work_dir: args.work_dir,
        buffer_cap: args.buffer_cap,
        format: args.format,
    };
    graph::run(&config)
}

//! Append-only output sink — a single writer thread fed over a channel.
//!
//! Several workers emit record batches concurrently; routing every batch
//! through one channel to one writer keeps bytes within a batch contiguous
//! and makes cross-batch order the channel's FIFO order. A flush message
//! carries an ack channel, so callers can wait until everything sent before
//! it has reached the underlying file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{self, Sender};

enum Msg {
    Write(Vec<u8>),
    Flush(Sender<()>),
}

/// Cloneable handle used by workers to append byte batches.
#[derive(Clone)]
pub struct SinkHandle {
    tx: Sender<Msg>,
}

impl SinkHandle {
    /// Queue one batch for writing. Batches from one handle land in send
    /// order; batches from different handles interleave at batch granularity.
    pub fn write(&self, bytes: Vec<u8>) -> Result<()> {
        self.tx
            .send(Msg::Write(bytes))
            .map_err(|_| anyhow!("output sink is closed"))
    }

    /// Block until every batch sent before this call has reached the file.
    pub fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = channel::bounded(1);
        self.tx
            .send(Msg::Flush(ack_tx))
            .map_err(|_| anyhow!("output sink is closed"))?;
        ack_rx
            .recv()
            .map_err(|_| anyhow!("output sink terminated before the flush completed"))
    }
}

/// The sink itself: owns the writer thread and the primary handle.
pub struct OutputSink {
    handle: SinkHandle,
    writer: JoinHandle<std::io::Result<()>>,
}

impl OutputSink {
    /// Create (truncating) `path` and start the writer thread.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("cannot open output file {}", path.display()))?;
        let (tx, rx) = channel::unbounded::<Msg>();

        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            let mut out = BufWriter::new(file);
            while let Ok(msg) = rx.recv() {
                match msg {
                    Msg::Write(bytes) => out.write_all(&bytes)?,
                    Msg::Flush(ack) => {
                        out.flush()?;
                        let _ = ack.send(());
                    }
                }
            }
            out.flush()
        });

        Ok(OutputSink {
            handle: SinkHandle { tx },
            writer,
        })
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Drain outstanding writes and stop the writer thread. All cloned
    /// handles must have been dropped, or this would wait forever.
    pub fn finish(self) -> Result<()> {
        let OutputSink { handle, writer } = self;
        drop(handle);
        match writer.join() {
            Ok(res) => res.context("writing the output file"),
            Err(_) => Err(anyhow!("output writer thread panicked")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batches_from_one_handle_keep_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = OutputSink::create(&path).unwrap();
        let handle = sink.handle();
        for i in 0..100 {
            handle.write(format!("line {i}\n").into_bytes()).unwrap();
        }
        drop(handle);
        sink.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let expected: String = (0..100).map(|i| format!("line {i}\n")).collect();
        assert_eq!(content, expected);
    }

    #[test]
    fn test_flush_is_a_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = OutputSink::create(&path).unwrap();
        let handle = sink.handle();
        handle.write(b"before".to_vec()).unwrap();
        handle.flush().unwrap();
        // The bytes are on disk once flush returns.
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "before");
        drop(handle);
        sink.finish().unwrap();
    }

    #[test]
    fn test_concurrent_writers_do_not_tear_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let sink = OutputSink::create(&path).unwrap();

        crossbeam::scope(|s| {
            for t in 0..4 {
                let handle = sink.handle();
                s.spawn(move |_| {
                    for i in 0..50 {
                        handle.write(format!("t{t}:{i}\n").into_bytes()).unwrap();
                    }
                });
            }
        })
        .unwrap();
        sink.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 200);
        lines.sort_unstable();
        lines.dedup();
        assert_eq!(lines.len(), 200);
    }
}

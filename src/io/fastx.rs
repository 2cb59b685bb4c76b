//! FASTX input — named sequence records from FASTA/FASTQ files.
//!
//! The extraction pipeline needs whole sequences with their placeholder
//! symbols intact (an `N` is a unitig boundary, not noise), so records are
//! parsed line-by-line rather than batched. Compressed input (gzip, zstd,
//! etc.) is handled transparently via `niffler`; multiple input files are
//! chained into one record stream.

use std::io::{BufRead, BufReader, Read};

use anyhow::{bail, Context, Result};

/// A named input sequence. Bases are uppercased on read, so lowercase
/// nucleotides count as valid and every other symbol is a placeholder.
#[derive(Debug, Clone)]
pub struct SeqRecord {
    pub name: String,
    pub seq: Vec<u8>,
}

/// Streaming FASTA/FASTQ reader over one or more input files.
///
/// Yields records lazily and exactly once; the source is not restartable —
/// callers needing a second pass open a fresh source.
pub struct FastxSource {
    reader: BufReader<Box<dyn Read + Send>>,
    /// Lookahead holding the next record's header line, when already read.
    pending: Option<String>,
}

impl FastxSource {
    /// Open the given files, chained, with automatic decompression.
    pub fn open(paths: &[String]) -> Result<Self> {
        let reader = open_concatenated_readers(paths)?;
        Ok(FastxSource {
            reader: BufReader::with_capacity(1 << 20, reader),
            pending: None,
        })
    }

    /// The next sequence record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<SeqRecord>> {
        let header = match self.take_header()? {
            Some(h) => h,
            None => return Ok(None),
        };

        if let Some(name) = header.strip_prefix('>') {
            self.read_fasta_record(name)
        } else if let Some(name) = header.strip_prefix('@') {
            self.read_fastq_record(name)
        } else {
            bail!("unrecognized record header: '{header}' (expected '>' or '@')");
        }
    }

    /// The pending header if set, else the next non-empty line.
    fn take_header(&mut self) -> Result<Option<String>> {
        if let Some(h) = self.pending.take() {
            return Ok(Some(h));
        }
        loop {
            match self.next_line()? {
                None => return Ok(None),
                Some(line) if line.is_empty() => continue,
                Some(line) => return Ok(Some(line)),
            }
        }
    }

    fn read_fasta_record(&mut self, name: &str) -> Result<Option<SeqRecord>> {
        let mut seq = Vec::new();
        loop {
            match self.next_line()? {
                None => break,
                Some(line) if line.starts_with('>') || line.starts_with('@') => {
                    self.pending = Some(line);
                    break;
                }
                Some(line) => seq.extend(line.bytes().map(|b| b.to_ascii_uppercase())),
            }
        }
        Ok(Some(SeqRecord {
            name: record_name(name),
            seq,
        }))
    }

    fn read_fastq_record(&mut self, name: &str) -> Result<Option<SeqRecord>> {
        let seq_line = self
            .next_line()?
            .with_context(|| format!("truncated FASTQ record '{name}': missing sequence"))?;
        let plus = self
            .next_line()?
            .with_context(|| format!("truncated FASTQ record '{name}': missing '+' line"))?;
        if !plus.starts_with('+') {
            bail!("malformed FASTQ record '{name}': expected '+', found '{plus}'");
        }
        self.next_line()?
            .with_context(|| format!("truncated FASTQ record '{name}': missing quality"))?;

        Ok(Some(SeqRecord {
            name: record_name(name),
            seq: seq_line.bytes().map(|b| b.to_ascii_uppercase()).collect(),
        }))
    }

    /// The next line with the trailing newline (and CR) trimmed, or `None`
    /// at end of input.
    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).context("reading input")?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }
}

/// First whitespace-delimited token of the header remainder.
fn record_name(header: &str) -> String {
    header
        .split_ascii_whitespace()
        .next()
        .unwrap_or("")
        .to_string()
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

/// Open a single file with automatic decompression (gzip, zstd, etc.).
fn open_with_decompression(path: &str) -> Result<Box<dyn Read + Send>> {
    let (reader, _format) = niffler::send::from_path(path)
        .with_context(|| format!("failed to open {path}"))?;
    Ok(reader)
}

/// Open multiple files and concatenate them into a single reader.
fn open_concatenated_readers(paths: &[String]) -> Result<Box<dyn Read + Send>> {
    if paths.is_empty() {
        bail!("no input files specified");
    }
    if paths.len() == 1 {
        return open_with_decompression(&paths[0]);
    }
    let mut readers: Vec<Box<dyn Read + Send>> = Vec::with_capacity(paths.len());
    for path in paths {
        readers.push(open_with_decompression(path)?);
    }
    Ok(Box::new(MultiReader {
        readers,
        current: 0,
    }))
}

/// Concatenating reader over multiple boxed readers.
struct MultiReader {
    readers: Vec<Box<dyn Read + Send>>,
    current: usize,
}

impl Read for MultiReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.current < self.readers.len() {
            let n = self.readers[self.current].read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            self.current += 1;
        }
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_for(content: &str) -> (tempfile::TempDir, FastxSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.fa");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        let source = FastxSource::open(&[path.display().to_string()]).unwrap();
        (dir, source)
    }

    #[test]
    fn test_multiline_fasta() {
        let (_dir, mut src) = source_for(">seq1 some description\nACGT\nacgn\n>seq2\nTTT\n");
        let rec = src.next_record().unwrap().unwrap();
        assert_eq!(rec.name, "seq1");
        assert_eq!(rec.seq, b"ACGTACGN");
        let rec = src.next_record().unwrap().unwrap();
        assert_eq!(rec.name, "seq2");
        assert_eq!(rec.seq, b"TTT");
        assert!(src.next_record().unwrap().is_none());
    }

    #[test]
    fn test_fastq_records() {
        let (_dir, mut src) = source_for("@r1\nACGT\n+\nIIII\n@r2\nggca\n+r2\n@@@@\n");
        let rec = src.next_record().unwrap().unwrap();
        assert_eq!(rec.name, "r1");
        assert_eq!(rec.seq, b"ACGT");
        // A quality line starting with '@' must not be taken for a header.
        let rec = src.next_record().unwrap().unwrap();
        assert_eq!(rec.name, "r2");
        assert_eq!(rec.seq, b"GGCA");
        assert!(src.next_record().unwrap().is_none());
    }

    #[test]
    fn test_multiple_files_chain() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.fa");
        let p2 = dir.path().join("b.fa");
        std::fs::write(&p1, ">a\nACG\n").unwrap();
        std::fs::write(&p2, ">b\nTGA\n").unwrap();
        let mut src =
            FastxSource::open(&[p1.display().to_string(), p2.display().to_string()]).unwrap();
        assert_eq!(src.next_record().unwrap().unwrap().name, "a");
        assert_eq!(src.next_record().unwrap().unwrap().name, "b");
        assert!(src.next_record().unwrap().is_none());
    }

    #[test]
    fn test_garbage_header_is_an_error() {
        let (_dir, mut src) = source_for("not a header\nACGT\n");
        assert!(src.next_record().is_err());
    }
}

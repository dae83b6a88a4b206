//! External sort for `(row, col, value)` triples.
//!
//! Triples are buffered in memory up to a fixed entry count. A full buffer is
//! sorted and spilled to a run file inside a private temporary directory; on
//! [`TripleSorter::finish`] the runs are merged with a min-heap into one
//! stream ordered by `(row, col)`.
//!
//! ## Run Record Format
//!
//! ```text
//! [crc32: u32 LE][row: i32 LE][col: i32 LE][value: f32 LE][seq: u64 LE]
//! ```
//!
//! The CRC covers the 20 payload bytes. A clean end of file at a record
//! boundary ends the run; a partial record or a CRC mismatch is an error.
//!
//! ## Duplicates
//!
//! Every pushed triple gets a sequence number. When the same `(row, col)` is
//! pushed more than once, only the triple with the highest sequence number
//! (the last one pushed) survives the merge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use tempfile::TempDir;
use tracing::{debug, info};

/// Default number of triples held in memory before a run is spilled.
pub const DEFAULT_BUFFER_ENTRIES: usize = 1 << 20;

/// Payload bytes of one spilled record: row, col, value, seq.
const PAYLOAD_BYTES: usize = 4 + 4 + 4 + 8;

/// One matrix entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triple {
    pub row: i32,
    pub col: i32,
    pub value: f32,
}

impl Triple {
    pub fn new(row: i32, col: i32, value: f32) -> Self {
        Self { row, col, value }
    }

    fn key(&self) -> (i32, i32) {
        (self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sequenced {
    triple: Triple,
    seq: u64,
}

/// Orders by `(row, col)` ascending, newest first within a key.
fn run_order(a: &Sequenced, b: &Sequenced) -> Ordering {
    a.triple
        .key()
        .cmp(&b.triple.key())
        .then_with(|| b.seq.cmp(&a.seq))
}

/// Accepts triples in any order and yields them sorted and deduplicated.
pub struct TripleSorter {
    dir: TempDir,
    buffer: Vec<Sequenced>,
    capacity: usize,
    runs: Vec<PathBuf>,
    next_seq: u64,
}

impl TripleSorter {
    /// Creates a sorter whose run files live in a fresh temporary directory
    /// under `parent`.
    pub fn new<P: AsRef<Path>>(parent: P, capacity: usize) -> Result<Self> {
        let parent = parent.as_ref();
        let dir = tempfile::Builder::new()
            .prefix("spill-")
            .tempdir_in(parent)
            .with_context(|| format!("creating spill directory in {}", parent.display()))?;
        let capacity = capacity.max(1);
        Ok(Self {
            dir,
            buffer: Vec::with_capacity(capacity.min(DEFAULT_BUFFER_ENTRIES)),
            capacity,
            runs: Vec::new(),
            next_seq: 0,
        })
    }

    pub fn push(&mut self, triple: Triple) -> Result<()> {
        self.buffer.push(Sequenced {
            triple,
            seq: self.next_seq,
        });
        self.next_seq += 1;
        if self.buffer.len() >= self.capacity {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of triples pushed so far, duplicates included.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.next_seq
    }

    /// Number of runs spilled so far.
    #[must_use]
    pub fn num_runs(&self) -> usize {
        self.runs.len()
    }

    fn spill(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_unstable_by(run_order);

        let path = self.dir.path().join(format!("run-{:06}.spill", self.runs.len()));
        let file = File::create(&path)
            .with_context(|| format!("creating spill run {}", path.display()))?;
        let mut out = BufWriter::new(file);
        let mut payload = [0u8; PAYLOAD_BYTES];
        for entry in self.buffer.drain(..) {
            encode_payload(&entry, &mut payload);
            let mut hasher = Crc32::new();
            hasher.update(&payload);
            out.write_u32::<LittleEndian>(hasher.finalize())?;
            out.write_all(&payload)?;
        }
        out.flush()?;

        debug!(run = self.runs.len(), path = %path.display(), "spilled sorted run");
        self.runs.push(path);
        Ok(())
    }

    /// Spills whatever is still buffered and returns the merged stream.
    pub fn finish(mut self) -> Result<SortedTriples> {
        self.spill()?;
        let mut heap = BinaryHeap::with_capacity(self.runs.len());
        let mut readers = Vec::with_capacity(self.runs.len());
        for (source, path) in self.runs.iter().enumerate() {
            let file =
                File::open(path).with_context(|| format!("opening spill run {}", path.display()))?;
            let mut reader = RunReader {
                rdr: BufReader::new(file),
                path: path.clone(),
            };
            if let Some(entry) = reader.next_record()? {
                heap.push(HeapEntry { entry, source });
            }
            readers.push(reader);
        }
        info!(
            triples = self.next_seq,
            runs = self.runs.len(),
            "merging spilled runs"
        );
        Ok(SortedTriples {
            _dir: self.dir,
            readers,
            heap,
            failed: false,
        })
    }
}

fn encode_payload(entry: &Sequenced, buf: &mut [u8; PAYLOAD_BYTES]) {
    LittleEndian::write_i32(&mut buf[0..4], entry.triple.row);
    LittleEndian::write_i32(&mut buf[4..8], entry.triple.col);
    LittleEndian::write_f32(&mut buf[8..12], entry.triple.value);
    LittleEndian::write_u64(&mut buf[12..20], entry.seq);
}

fn decode_payload(buf: &[u8; PAYLOAD_BYTES]) -> Sequenced {
    Sequenced {
        triple: Triple {
            row: LittleEndian::read_i32(&buf[0..4]),
            col: LittleEndian::read_i32(&buf[4..8]),
            value: LittleEndian::read_f32(&buf[8..12]),
        },
        seq: LittleEndian::read_u64(&buf[12..20]),
    }
}

struct RunReader {
    rdr: BufReader<File>,
    path: PathBuf,
}

impl RunReader {
    fn next_record(&mut self) -> Result<Option<Sequenced>> {
        let crc = match self.rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut payload = [0u8; PAYLOAD_BYTES];
        if let Err(e) = self.rdr.read_exact(&mut payload) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                bail!("truncated spill record in {}", self.path.display());
            }
            return Err(e.into());
        }

        let mut hasher = Crc32::new();
        hasher.update(&payload);
        if hasher.finalize() != crc {
            bail!("corrupt spill record in {}", self.path.display());
        }
        Ok(Some(decode_payload(&payload)))
    }
}

struct HeapEntry {
    entry: Sequenced,
    /// Index into `readers`.
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: reversed so the smallest key, then the newest seq, pops first
        run_order(&other.entry, &self.entry).then_with(|| other.source.cmp(&self.source))
    }
}

/// Sorted, deduplicated stream of triples produced by [`TripleSorter::finish`].
///
/// The spill directory is removed when the stream is dropped.
pub struct SortedTriples {
    _dir: TempDir,
    readers: Vec<RunReader>,
    heap: BinaryHeap<HeapEntry>,
    failed: bool,
}

impl SortedTriples {
    fn pop(&mut self) -> Result<Option<Sequenced>> {
        let Some(HeapEntry { entry, source }) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(next) = self.readers[source].next_record()? {
            self.heap.push(HeapEntry {
                entry: next,
                source,
            });
        }
        Ok(Some(entry))
    }

    /// Returns the next triple, skipping older values of the same `(row, col)`.
    pub fn next_triple(&mut self) -> Result<Option<Triple>> {
        let Some(winner) = self.pop()? else {
            return Ok(None);
        };
        while self
            .heap
            .peek()
            .is_some_and(|h| h.entry.triple.key() == winner.triple.key())
        {
            self.pop()?;
        }
        Ok(Some(winner.triple))
    }
}

impl Iterator for SortedTriples {
    type Item = Result<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_triple() {
            Ok(Some(t)) => Some(Ok(t)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

//! Approximate nearest neighbors over the rows of a [`DenseMatrix`].
//!
//! [`RandomProjectionFinder`] hashes every row into a 128-bit signature:
//! bit `i` is the sign of the row's dot product with random hyperplane `i`,
//! after each dimension is standardized by a sampled mean and deviation. A
//! query scores only the rows whose signatures agree with its own on the
//! most bits, so `max_traversal` bounds the number of cosine computations.
//!
//! ## Model File
//!
//! ```text
//! [magic: u32][bits: u32][dims: u32][rows: u32]
//! [mean: f64 × dims][dev: f64 × dims][plane: f64 × bits × dims]
//! [signature: u64 × 2 × rows][crc32: u32]
//! ```
//!
//! Big-endian. The CRC covers everything before it.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use matrix::{DenseMatrix, MatrixError, MatrixRow};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Number of hyperplanes, and so of signature bits per row.
pub const NUM_BITS: usize = 128;

/// Rows sampled to estimate per-dimension mean and deviation.
pub const SAMPLE_ROWS: usize = 5000;

const MODEL_MAGIC: u32 = 0x4B4E_4E50;

/// Added to every deviation so constant dimensions do not divide by zero.
const MIN_DEV: f64 = 0.0001;

/// One query result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub row_id: i32,
    /// Cosine similarity to the query.
    pub score: f64,
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    /// Higher score first; equal scores by ascending row id.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.row_id.cmp(&other.row_id))
    }
}

/// Keeps the `k` best neighbors seen so far.
struct TopK {
    k: usize,
    // max-heap on `Neighbor` order, so the worst kept neighbor is on top
    heap: BinaryHeap<Neighbor>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(1024)),
        }
    }

    fn visit(&mut self, row_id: i32, score: f64) {
        if self.k == 0 {
            return;
        }
        let n = Neighbor { row_id, score };
        if self.heap.len() < self.k {
            self.heap.push(n);
        } else if self.heap.peek().is_some_and(|worst| n < *worst) {
            self.heap.pop();
            self.heap.push(n);
        }
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}

/// Cosine similarity between `query` and a row; zero if either has no length.
fn cosine<R: MatrixRow>(query: &[f32], row: &R) -> f64 {
    let mut dot = 0.0;
    let mut qq = 0.0;
    let mut rr = 0.0;
    for (i, &q) in query.iter().enumerate() {
        let (q, r) = (f64::from(q), f64::from(row.value_at(i)));
        dot += q * r;
        qq += q * q;
        rr += r * r;
    }
    if qq == 0.0 || rr == 0.0 {
        0.0
    } else {
        dot / (qq.sqrt() * rr.sqrt())
    }
}

fn check_dims(query: &[f32], dims: usize) -> Result<()> {
    if query.len() != dims {
        return Err(MatrixError::InvalidArgument(format!(
            "query has {} dimensions, matrix has {dims}",
            query.len()
        ))
        .into());
    }
    Ok(())
}

/// Scores every row of `matrix` against `query`. Returns the `k` most
/// similar rows, best first.
pub fn exact_neighbors(matrix: &DenseMatrix, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
    check_dims(query, matrix.col_ids().len())?;
    let mut top = TopK::new(k);
    for row in matrix.iter() {
        let row = row?;
        top.visit(row.row_id(), cosine(query, &row));
    }
    Ok(top.into_sorted())
}

type Signature = [u64; 2];

fn agreement(a: &Signature, b: &Signature) -> usize {
    NUM_BITS - (a[0] ^ b[0]).count_ones() as usize - (a[1] ^ b[1]).count_ones() as usize
}

/// Random-projection index over a dense matrix. Borrows the matrix to
/// rescore candidates.
pub struct RandomProjectionFinder<'m> {
    matrix: &'m DenseMatrix,
    dims: usize,
    means: Vec<f64>,
    devs: Vec<f64>,
    /// `NUM_BITS` hyperplanes of `dims` coefficients each.
    planes: Vec<Vec<f64>>,
    /// Row ids in disk order; `signatures[i]` belongs to `ids[i]`.
    ids: Vec<i32>,
    signatures: Vec<Signature>,
}

impl<'m> RandomProjectionFinder<'m> {
    /// Builds an index with hyperplanes drawn from OS entropy.
    pub fn build(matrix: &'m DenseMatrix) -> Result<Self> {
        Self::build_with_rng(matrix, StdRng::from_entropy())
    }

    /// Builds an index whose hyperplanes are reproducible from `seed`.
    pub fn build_with_seed(matrix: &'m DenseMatrix, seed: u64) -> Result<Self> {
        Self::build_with_rng(matrix, StdRng::seed_from_u64(seed))
    }

    fn build_with_rng(matrix: &'m DenseMatrix, mut rng: StdRng) -> Result<Self> {
        let dims = matrix.col_ids().len();
        let (means, devs) = sample_moments(matrix, dims)?;
        let planes = (0..NUM_BITS)
            .map(|_| {
                (0..dims)
                    .map(|_| -> f64 { StandardNormal.sample(&mut rng) })
                    .collect::<Vec<f64>>()
            })
            .collect();

        let mut finder = Self {
            matrix,
            dims,
            means,
            devs,
            planes,
            ids: Vec::with_capacity(matrix.num_rows()),
            signatures: Vec::with_capacity(matrix.num_rows()),
        };
        let mut values = vec![0.0f32; dims];
        for row in matrix.iter() {
            let row = row?;
            for (d, v) in values.iter_mut().enumerate() {
                *v = row.value_at(d);
            }
            let sig = finder.project(&values);
            finder.ids.push(row.row_id());
            finder.signatures.push(sig);
        }
        info!(
            path = %matrix.path().display(),
            rows = finder.ids.len(),
            dims,
            "built random projection index"
        );
        Ok(finder)
    }

    #[must_use]
    pub fn dims(&self) -> usize {
        self.dims
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.ids.len()
    }

    fn project(&self, values: &[f32]) -> Signature {
        let standardized: Vec<f64> = values
            .iter()
            .zip(self.means.iter().zip(&self.devs))
            .map(|(&v, (m, s))| (f64::from(v) - m) / s)
            .collect();
        let mut sig = [0u64; 2];
        for (i, plane) in self.planes.iter().enumerate() {
            let s: f64 = plane.iter().zip(&standardized).map(|(a, b)| a * b).sum();
            if s > 0.0 {
                sig[i / 64] |= 1u64 << (i % 64);
            }
        }
        sig
    }

    /// Returns up to `k` rows most similar to `query`, best first. At least
    /// `max_traversal` rows (or all of them) are rescored by exact cosine.
    ///
    /// # Errors
    ///
    /// [`MatrixError::InvalidArgument`] if `query` does not have one value
    /// per matrix column.
    pub fn query(&self, query: &[f32], k: usize, max_traversal: usize) -> Result<Vec<Neighbor>> {
        self.search(query, k, max_traversal, None)
    }

    /// Like [`query`](Self::query), restricted to rows whose id is in `valid`.
    pub fn query_among(
        &self,
        query: &[f32],
        k: usize,
        max_traversal: usize,
        valid: &HashSet<i32>,
    ) -> Result<Vec<Neighbor>> {
        self.search(query, k, max_traversal, Some(valid))
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        max_traversal: usize,
        valid: Option<&HashSet<i32>>,
    ) -> Result<Vec<Neighbor>> {
        check_dims(query, self.dims)?;
        let target = self.project(query);
        let allowed = |id: &i32| valid.map_or(true, |v| v.contains(id));

        let mut hits = [0usize; NUM_BITS + 1];
        for (id, sig) in self.ids.iter().zip(&self.signatures) {
            if allowed(id) {
                hits[agreement(sig, &target)] += 1;
            }
        }
        let mut threshold = NUM_BITS;
        let mut count = 0;
        while threshold > 0 {
            count += hits[threshold];
            if count >= max_traversal {
                break;
            }
            threshold -= 1;
        }

        let mut top = TopK::new(k);
        let mut scored = 0usize;
        for (id, sig) in self.ids.iter().zip(&self.signatures) {
            if !allowed(id) || agreement(sig, &target) < threshold {
                continue;
            }
            let row = self.matrix.get_row(*id)?.ok_or_else(|| {
                MatrixError::InvalidState(format!("indexed row {id} is missing from the matrix"))
            })?;
            top.visit(*id, cosine(query, &row));
            scored += 1;
        }
        debug!(threshold, scored, k, "random projection query");
        Ok(top.into_sorted())
    }

    /// Writes the index to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut buf = Vec::with_capacity(
            16 + 8 * self.dims * (2 + NUM_BITS) + 16 * self.signatures.len() + 4,
        );
        buf.write_u32::<BigEndian>(MODEL_MAGIC)?;
        buf.write_u32::<BigEndian>(NUM_BITS as u32)?;
        buf.write_u32::<BigEndian>(u32::try_from(self.dims)?)?;
        buf.write_u32::<BigEndian>(u32::try_from(self.signatures.len())?)?;
        for v in self.means.iter().chain(&self.devs).chain(self.planes.iter().flatten()) {
            buf.write_f64::<BigEndian>(*v)?;
        }
        for sig in &self.signatures {
            buf.write_u64::<BigEndian>(sig[0])?;
            buf.write_u64::<BigEndian>(sig[1])?;
        }
        let mut hasher = Crc32::new();
        hasher.update(&buf);
        buf.write_u32::<BigEndian>(hasher.finalize())?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)
            .with_context(|| format!("creating model directory {}", dir.display()))?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("saving knn model {}", path.display()))?;
        info!(path = %path.display(), rows = self.signatures.len(), "saved knn model");
        Ok(())
    }

    /// Loads an index saved by [`save`](Self::save) for `matrix`.
    ///
    /// Returns `Ok(None)` when the file is missing, older than the matrix,
    /// or shaped for a different matrix. A damaged file is an error.
    pub fn load<P: AsRef<Path>>(matrix: &'m DenseMatrix, path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.is_file() {
            warn!(path = %path.display(), "not loading knn model: file does not exist");
            return Ok(None);
        }
        let model_time = fs::metadata(path)?.modified()?;
        let matrix_time = fs::metadata(matrix.path())?.modified()?;
        if model_time < matrix_time {
            warn!(
                path = %path.display(),
                matrix = %matrix.path().display(),
                "not loading knn model: older than matrix"
            );
            return Ok(None);
        }

        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if bytes.len() < 20 {
            bail!("truncated knn model {}", path.display());
        }
        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let mut hasher = Crc32::new();
        hasher.update(body);
        if hasher.finalize() != BigEndian::read_u32(trailer) {
            bail!("corrupt knn model {}", path.display());
        }
        if BigEndian::read_u32(&body[0..4]) != MODEL_MAGIC {
            bail!("{} is not a knn model", path.display());
        }

        let bits = BigEndian::read_u32(&body[4..8]) as usize;
        let dims = BigEndian::read_u32(&body[8..12]) as usize;
        let rows = BigEndian::read_u32(&body[12..16]) as usize;
        let expected_dims = matrix.col_ids().len();
        if bits != NUM_BITS || dims != expected_dims || rows != matrix.num_rows() {
            warn!(
                path = %path.display(),
                bits,
                dims,
                rows,
                expected_dims,
                expected_rows = matrix.num_rows(),
                "not loading knn model: shape does not match matrix"
            );
            return Ok(None);
        }
        let floats = dims * (2 + NUM_BITS);
        if body.len() != 16 + 8 * floats + 16 * rows {
            bail!("knn model {} has {} bytes", path.display(), bytes.len());
        }

        let mut at = 16;
        let mut next_f64 = || {
            let v = BigEndian::read_f64(&body[at..at + 8]);
            at += 8;
            v
        };
        let means: Vec<f64> = (0..dims).map(|_| next_f64()).collect();
        let devs: Vec<f64> = (0..dims).map(|_| next_f64()).collect();
        let planes: Vec<Vec<f64>> = (0..NUM_BITS)
            .map(|_| (0..dims).map(|_| next_f64()).collect())
            .collect();
        let start = 16 + 8 * floats;
        let signatures: Vec<Signature> = body[start..]
            .chunks_exact(16)
            .map(|c| [BigEndian::read_u64(&c[0..8]), BigEndian::read_u64(&c[8..16])])
            .collect();

        let ids: Vec<i32> = matrix.row_ids().to_vec();
        debug!(path = %path.display(), rows, dims, "loaded knn model");
        Ok(Some(Self {
            matrix,
            dims,
            means,
            devs,
            planes,
            ids,
            signatures,
        }))
    }
}

/// Mean and deviation of each dimension over the first [`SAMPLE_ROWS`] rows.
fn sample_moments(matrix: &DenseMatrix, dims: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut means = vec![0.0f64; dims];
    let mut n = 0usize;
    for row in matrix.iter().take(SAMPLE_ROWS) {
        let row = row?;
        for (d, m) in means.iter_mut().enumerate() {
            *m += f64::from(row.value_at(d));
        }
        n += 1;
    }
    if n == 0 {
        return Ok((means, vec![1.0; dims]));
    }
    for m in &mut means {
        *m /= n as f64;
    }

    let mut devs = vec![0.0f64; dims];
    for row in matrix.iter().take(SAMPLE_ROWS) {
        let row = row?;
        for (d, s) in devs.iter_mut().enumerate() {
            let diff = f64::from(row.value_at(d)) - means[d];
            *s += diff * diff;
        }
    }
    for s in &mut devs {
        *s = (*s / n as f64).sqrt() + MIN_DEV;
    }
    Ok((means, devs))
}

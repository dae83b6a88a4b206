//! Link graph stored as an adjacency matrix plus its transpose.
//!
//! ```text
//! <dir>/links.matrix             row = source id, columns = target ids
//! <dir>/links-transpose.matrix   row = target id, columns = source ids
//! ```
//!
//! [`LinkGraphBuilder`] takes edges in any order, sorts them externally
//! through [`TripleSorter`], writes the adjacency matrix and then transposes
//! it. [`LinkGraph::open`] reuses files built earlier.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::MatrixConfig;
use matrix::{MatrixRow, SparseMatrix, SparseMatrixWriter, SparseRow, ValueConf};
use tracing::info;

use crate::spill::{Triple, TripleSorter, DEFAULT_BUFFER_ENTRIES};
use crate::transpose::Transposer;

/// File name of the adjacency matrix inside a link graph directory.
pub const LINKS_FILE: &str = "links.matrix";

/// File name of the transposed adjacency matrix.
pub const LINKS_TRANSPOSE_FILE: &str = "links-transpose.matrix";

/// Collects edges and builds a [`LinkGraph`] from them.
pub struct LinkGraphBuilder {
    dir: PathBuf,
    sorter: TripleSorter,
    config: MatrixConfig,
    conf: ValueConf,
}

impl LinkGraphBuilder {
    /// Creates `dir` if needed and starts an empty builder.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_buffer_entries(dir, DEFAULT_BUFFER_ENTRIES)
    }

    /// Like [`new`](Self::new), but spills to disk every `entries` edges.
    pub fn with_buffer_entries<P: AsRef<Path>>(dir: P, entries: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating link graph directory {}", dir.display()))?;
        let sorter = TripleSorter::new(&dir, entries)?;
        Ok(Self {
            dir,
            sorter,
            config: MatrixConfig::from_env(),
            conf: ValueConf::default(),
        })
    }

    /// Settings for the transpose budget and for reopening the files.
    #[must_use]
    pub fn with_config(mut self, config: MatrixConfig) -> Self {
        self.config = config;
        self
    }

    /// Quantization bounds for edge values (default `[-1.1, 1.1]`).
    #[must_use]
    pub fn with_value_conf(mut self, conf: ValueConf) -> Self {
        self.conf = conf;
        self
    }

    /// Adds the edge `row → col`. A later edge with the same endpoints
    /// replaces the earlier one.
    pub fn add(&mut self, row: i32, col: i32, value: f32) -> Result<()> {
        self.sorter.push(Triple::new(row, col, value))
    }

    pub fn add_all<I>(&mut self, triples: I) -> Result<()>
    where
        I: IntoIterator<Item = Triple>,
    {
        for t in triples {
            self.sorter.push(t)?;
        }
        Ok(())
    }

    /// Writes both matrices and opens the result.
    pub fn build(self) -> Result<LinkGraph> {
        let links_path = self.dir.join(LINKS_FILE);
        let pushed = self.sorter.pushed();
        let sorted = self.sorter.finish()?;

        let writer = SparseMatrixWriter::with_conf(&links_path, self.conf)?;
        let mut current: Option<i32> = None;
        let mut cols: Vec<i32> = Vec::new();
        let mut values: Vec<f32> = Vec::new();
        for triple in sorted {
            let triple = triple?;
            if current != Some(triple.row) {
                if let Some(row) = current {
                    writer.write_row(&SparseRow::new(self.conf, row, &cols, &values)?)?;
                }
                current = Some(triple.row);
                cols.clear();
                values.clear();
            }
            cols.push(triple.col);
            values.push(triple.value);
        }
        if let Some(row) = current {
            writer.write_row(&SparseRow::new(self.conf, row, &cols, &values)?)?;
        }
        let rows = writer.num_rows()?;
        writer
            .finish()
            .with_context(|| format!("writing {}", links_path.display()))?;
        info!(dir = %self.dir.display(), edges = pushed, sources = rows, "wrote link matrix");

        let links = SparseMatrix::open_with(&links_path, &self.config)?;
        let stats = Transposer::with_config(&links, &self.config)
            .transpose_to(self.dir.join(LINKS_TRANSPOSE_FILE))
            .context("transposing link matrix")?;
        links.close();
        info!(
            dir = %self.dir.display(),
            targets = stats.rows,
            edges = stats.entries,
            "wrote transposed link matrix"
        );

        LinkGraph::open_with(&self.dir, &self.config)
    }
}

/// Read access to a built link graph.
pub struct LinkGraph {
    dir: PathBuf,
    outlinks: SparseMatrix,
    inlinks: SparseMatrix,
}

impl LinkGraph {
    /// Builds a graph in `dir` from `triples` with default settings.
    pub fn build<P, I>(dir: P, triples: I) -> Result<Self>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = Triple>,
    {
        let mut builder = LinkGraphBuilder::new(dir)?;
        builder.add_all(triples)?;
        builder.build()
    }

    /// Opens the matrices previously built in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::open_with(dir, &MatrixConfig::from_env())
    }

    pub fn open_with<P: AsRef<Path>>(dir: P, config: &MatrixConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let links_path = dir.join(LINKS_FILE);
        let transpose_path = dir.join(LINKS_TRANSPOSE_FILE);
        let outlinks = SparseMatrix::open_with(&links_path, config)
            .with_context(|| format!("opening {}", links_path.display()))?;
        let inlinks = SparseMatrix::open_with(&transpose_path, config)
            .with_context(|| format!("opening {}", transpose_path.display()))?;
        Ok(Self {
            dir,
            outlinks,
            inlinks,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Edges leaving `id`, keyed by target id.
    pub fn outlinks(&self, id: i32) -> Result<Option<SparseRow<'_>>> {
        Ok(self.outlinks.get_row(id)?)
    }

    /// Edges arriving at `id`, keyed by source id.
    pub fn inlinks(&self, id: i32) -> Result<Option<SparseRow<'_>>> {
        Ok(self.inlinks.get_row(id)?)
    }

    pub fn out_count(&self, id: i32) -> Result<usize> {
        Ok(self.outlinks(id)?.map_or(0, |r| r.num_cols()))
    }

    pub fn in_count(&self, id: i32) -> Result<usize> {
        Ok(self.inlinks(id)?.map_or(0, |r| r.num_cols()))
    }

    /// The adjacency matrix itself.
    #[must_use]
    pub fn outlink_matrix(&self) -> &SparseMatrix {
        &self.outlinks
    }

    #[must_use]
    pub fn inlink_matrix(&self) -> &SparseMatrix {
        &self.inlinks
    }

    pub fn close(self) {
        self.outlinks.close();
        self.inlinks.close();
    }
}

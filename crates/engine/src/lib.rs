//! # Engine - Matrix Processing Pipelines
//!
//! Whole-file operations built on the [`matrix`] crate: out-of-core
//! transpose, row sorting, the link graph builder and approximate nearest
//! neighbors over dense rows.
//!
//! ## Architecture
//!
//! ```text
//!  edges (any order)                   matrix file
//!        |                                  |
//!        v                                  v
//! ┌──────────────────┐   ┌──────────────────────────────────────┐
//! │ spill.rs         │   │ transpose.rs                         │
//! │ buffer → runs    │   │ count pass → plan batches →          │
//! │ → heap merge     │   │ one scan per batch → writer          │
//! └────────┬─────────┘   └──────────────────────────────────────┘
//!          v                         ^
//! ┌──────────────────┐               │
//! │ links.rs         │───────────────┘
//! │ group by row →   │   links.matrix → links-transpose.matrix
//! │ writer           │
//! └──────────────────┘
//!
//! sort.rs: any matrix → same matrix with rows in ascending id order
//! knn.rs:  dense matrix → 128-bit row signatures → top-k by cosine
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                              |
//! |-----------------|------------------------------------------------------|
//! | [`spill`]       | `TripleSorter`: bounded buffer, CRC-framed runs, merge |
//! | [`transpose`]   | `Transposer`, batch planning, consistency check      |
//! | [`sort`]        | `sort_matrix()` for sparse and dense files           |
//! | [`links`]       | `LinkGraphBuilder`, `LinkGraph` (out/in links)       |
//! | [`knn`]         | `RandomProjectionFinder`, `exact_neighbors()`        |
//!
//! All operations return [`anyhow::Result`]; typed [`matrix::MatrixError`]s
//! stay reachable through `downcast_ref`.

pub mod knn;
pub mod links;
pub mod sort;
pub mod spill;
pub mod transpose;

pub use knn::{exact_neighbors, Neighbor, RandomProjectionFinder};
pub use links::{LinkGraph, LinkGraphBuilder, LINKS_FILE, LINKS_TRANSPOSE_FILE};
pub use sort::{sort_dense, sort_matrix, sort_sparse};
pub use spill::{SortedTriples, Triple, TripleSorter, DEFAULT_BUFFER_ENTRIES};
pub use transpose::{
    column_cost, plan_batches, transpose, transpose_with, TransposeStats, Transposer,
};

#[cfg(test)]
mod tests;

//! Embeddable on-disk vector store with metadata filtering.
//!
//! `flatvec` persists fixed-dimension f32 vectors in a single flat record
//! file and their JSON metadata in a SQLite database next to it, and
//! answers exact brute-force top-k queries by cosine similarity —
//! optionally restricted by a MongoDB-shaped metadata predicate that is
//! translated to SQL. It is built to be linked into a host process and
//! driven through a narrow, path-keyed call surface.
//!
//! # Files
//!
//! For a store opened at path `P`:
//! - `P` — the vector file: an 8-byte header (record count, dimension
//!   count) followed by fixed-size records.
//! - `P.metadata.db` — the SQLite metadata store.
//! - `P.temp` — transient, present only while a delete rewrites the file.
//!
//! # Quick start
//!
//! ```no_run
//! use flatvec::prelude::*;
//!
//! # fn main() -> flatvec::FlatVecResult<()> {
//! let conn = flatvec::connect("/tmp/example.vec", 4)?;
//!
//! conn.insert(
//!     &[
//!         (vec![1.0, 0.0, 0.0, 0.0], br#"{"tag":"a"}"#.to_vec()),
//!         (vec![0.0, 1.0, 0.0, 0.0], br#"{"tag":"b"}"#.to_vec()),
//!     ],
//!     4,
//! )?;
//!
//! let hits = conn.search(&[1.0, 0.0, 0.0, 0.0], 1)?;
//! assert_eq!(hits.len(), 1);
//!
//! let tagged = conn.search_with_filter(
//!     &[1.0, 0.0, 0.0, 0.0],
//!     10,
//!     r#"{"tag":{"$eq":"b"}}"#,
//! )?;
//! assert_eq!(tagged.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Every operation is synchronous and blocking; hosts that want
//! concurrency run calls on worker threads. Per connection, mutations
//! (insert, delete, update) are exclusive while searches and pagination
//! share a read lock, so parallel searches are fine and never observe a
//! half-applied mutation.
//!
//! # Design boundaries
//!
//! Single process, single node. Scans are exact and linear — there is no
//! graph or tree index. Deletes rewrite the vector file rather than
//! tombstoning. Crash safety is limited to what SQLite provides for the
//! metadata side.

/// Error types for store operations.
pub mod error;

/// Vector kernels (dot product, normalization) with SIMD dispatch.
pub mod simd;

/// Bounded top-k selection for streaming scans.
pub mod topk;

/// The flat vector file: header plus fixed-size records.
pub mod vecfile;

/// SQLite-backed metadata store.
pub mod metadata;

/// Predicate document → SQL WHERE clause translation.
pub mod filter;

/// Process-wide connection registry.
pub mod registry;

/// A live store connection and its operations.
pub mod connection;

pub use connection::{Connection, IndexStats, PageItem, SearchResult, UpdateItem};
pub use error::{FlatVecError, FlatVecResult};
pub use registry::{connect, refresh_connection};

use std::path::Path;

/// Read the header of a registered store: record count and dimensions.
pub fn stats(path: impl AsRef<Path>) -> FlatVecResult<IndexStats> {
    registry::get(path)?.stats()
}

/// Insert (vector, payload) pairs into a registered store.
///
/// Returns the number of pairs actually stored, which may be less than
/// requested (pairs with a mismatched vector length are skipped).
pub fn insert(
    path: impl AsRef<Path>,
    items: &[(Vec<f32>, Vec<u8>)],
    dimensions: u32,
) -> FlatVecResult<usize> {
    registry::get(path)?.insert(items, dimensions)
}

/// Top-k cosine search against a registered store.
pub fn search(path: impl AsRef<Path>, query: &[f32], k: usize) -> FlatVecResult<Vec<SearchResult>> {
    registry::get(path)?.search(query, k)
}

/// Top-k cosine search restricted by a metadata predicate.
pub fn search_with_filter(
    path: impl AsRef<Path>,
    query: &[f32],
    k: usize,
    predicate: &str,
) -> FlatVecResult<Vec<SearchResult>> {
    registry::get(path)?.search_with_filter(query, k, predicate)
}

/// Remove records by metadata id. Returns the number actually removed.
pub fn delete_by_ids(path: impl AsRef<Path>, ids: &[u32]) -> FlatVecResult<usize> {
    registry::get(path)?.delete_by_ids(ids)
}

/// Remove every record whose metadata satisfies the predicate.
pub fn delete_by_filter(path: impl AsRef<Path>, predicate: &str) -> FlatVecResult<usize> {
    registry::get(path)?.delete_by_filter(predicate)
}

/// Replace vector and payload for each item, by id. Returns the number of
/// items updated.
pub fn update_by_ids(path: impl AsRef<Path>, items: &[UpdateItem]) -> FlatVecResult<usize> {
    registry::get(path)?.update_by_ids(items)
}

/// Read a window of records in file order.
pub fn paginate(
    path: impl AsRef<Path>,
    skip: usize,
    limit: usize,
) -> FlatVecResult<Vec<PageItem>> {
    registry::get(path)?.paginate(skip, limit)
}

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::connection::{Connection, IndexStats, PageItem, SearchResult, UpdateItem};
    pub use crate::error::{FlatVecError, FlatVecResult};
    pub use crate::{
        connect, delete_by_filter, delete_by_ids, insert, paginate, refresh_connection, search,
        search_with_filter, stats, update_by_ids,
    };
}

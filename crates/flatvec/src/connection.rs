//! A live store connection and the operations that run against it.
//!
//! A [`Connection`] pairs the vector file with its metadata store and
//! serializes access: `insert`, `delete_by_ids`, `delete_by_filter` and
//! `update_by_ids` hold the write lock for their full duration, while
//! `search` and `paginate` share the read lock, so two searches can run in
//! parallel but never observe a half-applied mutation. The metadata store
//! sits behind its own mutex and is always taken after the file lock.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::error::{FlatVecError, FlatVecResult};
use crate::filter;
use crate::metadata::MetadataStore;
use crate::simd;
use crate::topk::TopK;
use crate::vecfile::{
    decode_records, encode_record, record_id, record_size, scan_buffer_records, VecFileHeader,
    VectorFile,
};

/// Suffix of the transient rewrite target used by deletes.
pub const TEMP_FILE_SUFFIX: &str = ".temp";

/// Header contents as reported by [`Connection::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct IndexStats {
    pub count: u32,
    pub dimensions: u32,
}

/// One ranked search hit. The payload bytes are owned by the caller.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SearchResult {
    pub id: u32,
    pub similarity: f32,
    pub payload: Vec<u8>,
}

/// One record of a paginated window, in file order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PageItem {
    pub id: u32,
    pub vector: Vec<f32>,
    pub payload: Vec<u8>,
}

/// Replacement vector and payload for one stored id.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateItem {
    pub id: u32,
    pub vector: Vec<f32>,
    pub payload: Vec<u8>,
}

/// A registered handle pair: vector file plus metadata store.
pub struct Connection {
    path: PathBuf,
    dimensions: AtomicU32,
    vec_file: RwLock<VectorFile>,
    metadata: Mutex<MetadataStore>,
}

fn read_file(lock: &RwLock<VectorFile>) -> RwLockReadGuard<'_, VectorFile> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_file(lock: &RwLock<VectorFile>) -> RwLockWriteGuard<'_, VectorFile> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock_store(lock: &Mutex<MetadataStore>) -> MutexGuard<'_, MetadataStore> {
    lock.lock().unwrap_or_else(|e| e.into_inner())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(TEMP_FILE_SUFFIX);
    PathBuf::from(os)
}

impl Connection {
    /// Open both underlying files for `path`, patching the header
    /// dimension field if this connection is the first to establish it.
    pub(crate) fn open(path: &Path, dimensions: u32) -> FlatVecResult<Self> {
        let mut vec_file = VectorFile::open(path)?;
        let header = vec_file.header()?;
        let resolved = if header.dimensions != 0 {
            // The stored dimension count is authoritative.
            header.dimensions
        } else {
            if dimensions != 0 {
                vec_file.write_dimensions(dimensions)?;
            }
            dimensions
        };
        let metadata = MetadataStore::open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            dimensions: AtomicU32::new(resolved),
            vec_file: RwLock::new(vec_file),
            metadata: Mutex::new(metadata),
        })
    }

    /// Path this connection is registered under.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolved dimension count (0 until the first insert establishes it).
    #[must_use]
    pub fn dimensions(&self) -> u32 {
        self.dimensions.load(Ordering::Relaxed)
    }

    /// Read the header. No side effects.
    pub fn stats(&self) -> FlatVecResult<IndexStats> {
        let vf = read_file(&self.vec_file);
        let header = vf.header()?;
        Ok(IndexStats {
            count: header.count,
            dimensions: header.dimensions,
        })
    }

    /// Insert (vector, payload) pairs.
    ///
    /// Pairs whose vector is not exactly D lanes long are skipped, not
    /// fatal. Metadata rows commit iff at least one pair was staged; the
    /// vector file is untouched otherwise. Vectors are unit-normalized
    /// before they reach disk. Returns the number of pairs stored.
    pub fn insert(&self, items: &[(Vec<f32>, Vec<u8>)], dimensions: u32) -> FlatVecResult<usize> {
        let mut vf = write_file(&self.vec_file);
        let header = vf.header()?;

        let dims = if header.dimensions != 0 {
            if dimensions != 0 && dimensions != header.dimensions {
                return Err(FlatVecError::InvalidArgument(format!(
                    "dimension mismatch: file stores {}, caller supplied {}",
                    header.dimensions, dimensions
                )));
            }
            header.dimensions
        } else {
            if dimensions == 0 {
                return Err(FlatVecError::InvalidArgument(
                    "dimensions must be set by the first insert".to_string(),
                ));
            }
            dimensions
        };

        let valid: Vec<&(Vec<f32>, Vec<u8>)> = items
            .iter()
            .filter(|(vector, _)| vector.len() == dims as usize)
            .collect();
        if valid.len() < items.len() {
            warn!(
                skipped = items.len() - valid.len(),
                dimensions = dims,
                "skipping pairs whose vector length does not match"
            );
        }
        if valid.is_empty() {
            return Ok(0);
        }

        let payloads: Vec<&[u8]> = valid.iter().map(|(_, payload)| payload.as_slice()).collect();
        let ids = lock_store(&self.metadata).insert_batch(&payloads)?;

        let mut encoded = Vec::with_capacity(valid.len() * record_size(dims));
        let mut staged = 0usize;
        for (item, id) in valid.iter().zip(ids.iter()) {
            let Some(id) = id else { continue };
            encode_record(&mut encoded, *id, &simd::normalized(&item.0));
            staged += 1;
        }
        if staged == 0 {
            return Ok(0);
        }

        vf.append_records(&encoded)?;
        vf.write_count(header.count + staged as u32)?;
        if header.dimensions == 0 {
            vf.write_dimensions(dims)?;
            self.dimensions.store(dims, Ordering::Relaxed);
        }

        Ok(staged)
    }

    /// Top-k cosine search over every stored record.
    pub fn search(&self, query: &[f32], k: usize) -> FlatVecResult<Vec<SearchResult>> {
        if k == 0 {
            return Err(FlatVecError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        let vf = read_file(&self.vec_file);
        self.scan_ranked(&vf, query, k, None)
    }

    /// Top-k cosine search restricted to records whose metadata satisfies
    /// `predicate`. An unmatched predicate returns empty immediately; an
    /// unparseable one degrades to an unrestricted search.
    pub fn search_with_filter(
        &self,
        query: &[f32],
        k: usize,
        predicate: &str,
    ) -> FlatVecResult<Vec<SearchResult>> {
        if k == 0 {
            return Err(FlatVecError::InvalidArgument(
                "k must be at least 1".to_string(),
            ));
        }
        let clause = filter::to_where_clause(predicate);

        let vf = read_file(&self.vec_file);
        let mut allowed = lock_store(&self.metadata).filter_ids(&clause)?;
        if allowed.is_empty() {
            return Ok(Vec::new());
        }
        allowed.sort_unstable();
        self.scan_ranked(&vf, query, k, Some(&allowed))
    }

    /// Linear scan feeding the bounded selector, then payload attachment.
    /// `allowed` must be sorted; records outside it are skipped before the
    /// dot product runs.
    fn scan_ranked(
        &self,
        vf: &VectorFile,
        query: &[f32],
        k: usize,
        allowed: Option<&[u32]>,
    ) -> FlatVecResult<Vec<SearchResult>> {
        let header = vf.header()?;
        if header.count == 0 || header.dimensions == 0 {
            return Ok(Vec::new());
        }
        if query.len() != header.dimensions as usize {
            return Err(FlatVecError::InvalidArgument(format!(
                "query has {} lanes, stored vectors have {}",
                query.len(),
                header.dimensions
            )));
        }

        let query_norm = simd::normalized(query);
        let recsize = record_size(header.dimensions);
        let stride = header.dimensions as usize + 1;
        let buf_records = scan_buffer_records(header.dimensions);

        let mut reader = vf.record_reader()?;
        let mut bytes = vec![0u8; buf_records * recsize];
        let mut floats: Vec<f32> = Vec::new();
        let mut topk = TopK::new(k);

        let mut remaining = header.count as usize;
        while remaining > 0 {
            let n = remaining.min(buf_records);
            let chunk = &mut bytes[..n * recsize];
            reader.read_exact(chunk)?;
            decode_records(chunk, &mut floats);

            for j in 0..n {
                let record = &floats[j * stride..(j + 1) * stride];
                let id = record_id(record[0]);
                if let Some(allowed) = allowed {
                    if allowed.binary_search(&id).is_err() {
                        continue;
                    }
                }
                topk.offer(simd::dot(&query_norm, &record[1..]), id);
            }
            remaining -= n;
        }

        let ranked = topk.drain();
        let ids: Vec<u32> = ranked.iter().map(|(id, _)| *id).collect();
        let mut payloads = lock_store(&self.metadata).fetch_many(&ids)?;

        Ok(ranked
            .into_iter()
            .map(|(id, similarity)| SearchResult {
                id,
                similarity,
                payload: payloads.remove(&id).unwrap_or_else(|| b"{}".to_vec()),
            })
            .collect())
    }

    /// Remove records by metadata id via a file rewrite.
    ///
    /// Surviving records stream into `path + ".temp"`, which atomically
    /// replaces the live file; the matching metadata rows are then deleted
    /// in batches inside one transaction. The original file is intact if
    /// anything fails before the rename. Returns the number of records
    /// actually removed (zero matches is success, not an error).
    pub fn delete_by_ids(&self, ids: &[u32]) -> FlatVecResult<usize> {
        if ids.is_empty() {
            return Err(FlatVecError::InvalidArgument(
                "empty id list".to_string(),
            ));
        }
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut vf = write_file(&self.vec_file);
        let header = vf.header()?;
        if header.count == 0 || header.dimensions == 0 {
            // No records on disk; still drop any orphaned metadata rows.
            lock_store(&self.metadata).delete_ids(&sorted)?;
            return Ok(0);
        }

        let preserved = match rewrite_without(&self.path, &vf, header, &sorted) {
            Ok(preserved) => preserved,
            Err(e) => {
                let _ = fs::remove_file(temp_path(&self.path));
                return Err(e);
            }
        };

        vf.reopen()?;
        lock_store(&self.metadata).delete_ids(&sorted)?;

        Ok(header.count as usize - preserved)
    }

    /// Remove every record whose metadata satisfies `predicate`.
    pub fn delete_by_filter(&self, predicate: &str) -> FlatVecResult<usize> {
        let clause = filter::to_where_clause(predicate);
        let ids = lock_store(&self.metadata).filter_ids(&clause)?;
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_by_ids(&ids)
    }

    /// Replace payload and vector for each item, by id.
    ///
    /// Payload rows update inside one transaction; vectors are located by
    /// linear scan (the file carries no id index) and overwritten in
    /// place, normalized. Returns the number of items whose row and record
    /// were both updated.
    pub fn update_by_ids(&self, items: &[UpdateItem]) -> FlatVecResult<usize> {
        if items.is_empty() {
            return Err(FlatVecError::InvalidArgument(
                "empty update list".to_string(),
            ));
        }

        let mut vf = write_file(&self.vec_file);
        let header = vf.header()?;
        if header.count == 0 || header.dimensions == 0 {
            return Ok(0);
        }
        for item in items {
            if item.vector.len() != header.dimensions as usize {
                return Err(FlatVecError::InvalidArgument(format!(
                    "update for id {} has {} lanes, stored vectors have {}",
                    item.id,
                    item.vector.len(),
                    header.dimensions
                )));
            }
        }

        let rows: Vec<(u32, &[u8])> = items
            .iter()
            .map(|item| (item.id, item.payload.as_slice()))
            .collect();
        let matched = lock_store(&self.metadata).update_batch(&rows)?;

        let mut wanted: HashMap<u32, usize> = HashMap::new();
        for (index, (item, row_matched)) in items.iter().zip(matched.iter()).enumerate() {
            if *row_matched {
                wanted.insert(item.id, index);
            }
        }
        if wanted.is_empty() {
            return Ok(0);
        }

        let recsize = record_size(header.dimensions);
        let buf_records = scan_buffer_records(header.dimensions);
        let mut reader = vf.record_reader()?;
        let mut bytes = vec![0u8; buf_records * recsize];
        let mut updated = 0usize;
        let mut record_index = 0u64;
        let mut remaining = header.count as usize;

        while remaining > 0 && updated < wanted.len() {
            let n = remaining.min(buf_records);
            let chunk = &mut bytes[..n * recsize];
            reader.read_exact(chunk)?;

            for j in 0..n {
                let off = j * recsize;
                let id = u32::from_le_bytes([
                    chunk[off],
                    chunk[off + 1],
                    chunk[off + 2],
                    chunk[off + 3],
                ]);
                if let Some(&index) = wanted.get(&id) {
                    vf.overwrite_vector(
                        record_index + j as u64,
                        header.dimensions,
                        &simd::normalized(&items[index].vector),
                    )?;
                    updated += 1;
                }
            }
            record_index += n as u64;
            remaining -= n;
        }

        Ok(updated)
    }

    /// Read a window of records in file order (not similarity-sorted).
    ///
    /// Returns an empty page when `skip` reaches past the end; the limit is
    /// clamped to the records that exist.
    pub fn paginate(&self, skip: usize, limit: usize) -> FlatVecResult<Vec<PageItem>> {
        let vf = read_file(&self.vec_file);
        let header = vf.header()?;
        if header.count == 0 || header.dimensions == 0 {
            return Ok(Vec::new());
        }
        let total = header.count as usize;
        if skip >= total || limit == 0 {
            return Ok(Vec::new());
        }
        let effective = limit.min(total - skip);

        let recsize = record_size(header.dimensions);
        let stride = header.dimensions as usize + 1;
        let mut reader = vf.record_reader_at(skip as u64, header.dimensions)?;
        let mut bytes = vec![0u8; effective * recsize];
        reader.read_exact(&mut bytes)?;

        let mut floats: Vec<f32> = Vec::new();
        decode_records(&bytes, &mut floats);

        let mut page: Vec<(u32, Vec<f32>)> = Vec::with_capacity(effective);
        for j in 0..effective {
            let record = &floats[j * stride..(j + 1) * stride];
            page.push((record_id(record[0]), record[1..].to_vec()));
        }

        let ids: Vec<u32> = page.iter().map(|(id, _)| *id).collect();
        let mut payloads = lock_store(&self.metadata).fetch_many(&ids)?;

        Ok(page
            .into_iter()
            .map(|(id, vector)| PageItem {
                id,
                vector,
                payload: payloads.remove(&id).unwrap_or_else(|| b"{}".to_vec()),
            })
            .collect())
    }

    /// Re-open the vector file handle (after an external replacement).
    pub(crate) fn reopen_vector_file(&self) -> FlatVecResult<()> {
        write_file(&self.vec_file).reopen()
    }
}

/// Stream the live file into a temp rewrite target, dropping records whose
/// id appears in `drop_ids` (sorted), and swap it into place. Returns the
/// preserved record count. The caller removes the temp file on failure.
fn rewrite_without(
    path: &Path,
    vf: &VectorFile,
    header: VecFileHeader,
    drop_ids: &[u32],
) -> FlatVecResult<usize> {
    let temp = temp_path(path);
    let mut out = VectorFile::create(&temp)?;
    out.write_dimensions(header.dimensions)?;

    let recsize = record_size(header.dimensions);
    let buf_records = scan_buffer_records(header.dimensions);
    let mut reader = vf.record_reader()?;
    let mut bytes = vec![0u8; buf_records * recsize];
    let mut write_buf: Vec<u8> = Vec::with_capacity(buf_records * recsize);
    let mut preserved = 0usize;
    let mut remaining = header.count as usize;

    while remaining > 0 {
        let n = remaining.min(buf_records);
        let chunk = &mut bytes[..n * recsize];
        reader.read_exact(chunk)?;

        for j in 0..n {
            let record = &chunk[j * recsize..(j + 1) * recsize];
            let id = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            if drop_ids.binary_search(&id).is_ok() {
                continue;
            }
            write_buf.extend_from_slice(record);
            preserved += 1;
            if write_buf.len() >= buf_records * recsize {
                out.append_records(&write_buf)?;
                write_buf.clear();
            }
        }
        remaining -= n;
    }

    if !write_buf.is_empty() {
        out.append_records(&write_buf)?;
    }
    out.write_count(preserved as u32)?;
    out.sync_all()?;
    drop(out);

    fs::rename(&temp, path)?;
    Ok(preserved)
}

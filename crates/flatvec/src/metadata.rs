//! SQLite-backed metadata store colocated with the vector file.
//!
//! One table keyed by an auto-incrementing id holds the raw payload bytes
//! and their length; predicate filtering runs as SQL over
//! `json_extract(payload, ...)`. Ids are stable and never reused, which is
//! what lets the vector file reference rows by a bare integer.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::Connection as SqliteConnection;
use tracing::warn;

use crate::error::FlatVecResult;

/// Suffix appended to the vector file path to form the store path.
pub const METADATA_DB_SUFFIX: &str = ".metadata.db";

/// Rows deleted per statement inside the delete transaction.
pub const DELETE_BATCH_SIZE: usize = 500;

/// Bound-parameter cap for IN clauses (SQLite's default host-parameter limit).
pub const MAX_IDS_PER_QUERY: usize = 999;

/// Payload handed back for ids that have no row: the empty JSON object.
const EMPTY_PAYLOAD: &[u8] = b"{}";

pub struct MetadataStore {
    conn: SqliteConnection,
}

impl MetadataStore {
    /// Open (or create) the store that accompanies the vector file at
    /// `vec_path`, creating the schema and attempting WAL journaling.
    pub fn open(vec_path: &Path) -> FlatVecResult<Self> {
        let mut db_path = vec_path.as_os_str().to_os_string();
        db_path.push(METADATA_DB_SUFFIX);
        let conn = SqliteConnection::open(db_path)?;

        // WAL is a performance pragma, not a correctness one; keep going
        // without it on filesystems that refuse.
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            warn!(error = %e, "could not enable WAL journal mode");
        }

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 payload TEXT,
                 payload_length INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_metadata_id ON metadata(id);",
        )?;

        Ok(Self { conn })
    }

    /// Insert a batch of payloads inside one transaction.
    ///
    /// Returns the assigned id per payload, `None` where the row failed
    /// (failures are logged, not fatal to the batch). The transaction
    /// commits iff at least one row succeeded; otherwise it rolls back.
    pub fn insert_batch(&mut self, payloads: &[&[u8]]) -> FlatVecResult<Vec<Option<u32>>> {
        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(payloads.len());
        {
            let mut stmt =
                tx.prepare("INSERT INTO metadata (payload, payload_length) VALUES (?1, ?2)")?;
            for payload in payloads {
                let result = match std::str::from_utf8(payload) {
                    // Valid UTF-8 binds as TEXT so json_extract can see it.
                    Ok(text) => stmt.execute(rusqlite::params![text, payload.len() as i64]),
                    // Anything else binds as BLOB: byte-exact round trip,
                    // invisible to JSON predicates.
                    Err(_) => stmt.execute(rusqlite::params![*payload, payload.len() as i64]),
                };
                match result {
                    Ok(_) => ids.push(Some(tx.last_insert_rowid() as u32)),
                    Err(e) => {
                        warn!(error = %e, "metadata row insert failed, skipping");
                        ids.push(None);
                    }
                }
            }
        }
        if ids.iter().any(Option::is_some) {
            tx.commit()?;
        } else {
            tx.rollback()?;
        }
        Ok(ids)
    }

    /// Fetch payloads for a set of ids, batched to stay under the
    /// host-parameter limit. Every requested id is present in the result;
    /// ids without a row map to the two-byte `{}` marker.
    pub fn fetch_many(&self, ids: &[u32]) -> FlatVecResult<HashMap<u32, Vec<u8>>> {
        let mut out: HashMap<u32, Vec<u8>> = HashMap::with_capacity(ids.len());

        for batch in ids.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; batch.len()].join(",");
            let sql = format!(
                "SELECT id, payload FROM metadata WHERE id IN ({})",
                placeholders
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let params = rusqlite::params_from_iter(batch.iter().map(|id| *id as i64));
            let mut rows = stmt.query(params)?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                let payload = match row.get_ref(1)? {
                    ValueRef::Text(bytes) => bytes.to_vec(),
                    ValueRef::Blob(bytes) => bytes.to_vec(),
                    _ => EMPTY_PAYLOAD.to_vec(),
                };
                out.insert(id as u32, payload);
            }
        }

        for id in ids {
            out.entry(*id).or_insert_with(|| EMPTY_PAYLOAD.to_vec());
        }
        Ok(out)
    }

    /// Ids of all rows satisfying a translator-emitted WHERE clause.
    pub fn filter_ids(&self, where_clause: &str) -> FlatVecResult<Vec<u32>> {
        let sql = format!("SELECT id FROM metadata WHERE {}", where_clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids.into_iter().map(|id| id as u32).collect())
    }

    /// Delete rows by id, batched inside a single transaction.
    pub fn delete_ids(&mut self, ids: &[u32]) -> FlatVecResult<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0usize;
        for batch in ids.chunks(DELETE_BATCH_SIZE) {
            let placeholders = vec!["?"; batch.len()].join(",");
            let sql = format!("DELETE FROM metadata WHERE id IN ({})", placeholders);
            let params = rusqlite::params_from_iter(batch.iter().map(|id| *id as i64));
            deleted += tx.execute(&sql, params)?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Replace payloads row by row inside one transaction.
    ///
    /// Returns, per item, whether a row with that id existed. Individual
    /// statement errors are logged and reported as `false` rather than
    /// aborting the batch.
    pub fn update_batch(&mut self, items: &[(u32, &[u8])]) -> FlatVecResult<Vec<bool>> {
        let tx = self.conn.transaction()?;
        let mut matched = Vec::with_capacity(items.len());
        {
            let mut stmt = tx.prepare(
                "UPDATE metadata SET payload = ?1, payload_length = ?2 WHERE id = ?3",
            )?;
            for (id, payload) in items {
                let result = match std::str::from_utf8(payload) {
                    Ok(text) => stmt.execute(rusqlite::params![
                        text,
                        payload.len() as i64,
                        *id as i64
                    ]),
                    Err(_) => stmt.execute(rusqlite::params![
                        *payload,
                        payload.len() as i64,
                        *id as i64
                    ]),
                };
                match result {
                    Ok(rows) => matched.push(rows > 0),
                    Err(e) => {
                        warn!(id = *id, error = %e, "metadata row update failed, skipping");
                        matched.push(false);
                    }
                }
            }
        }
        tx.commit()?;
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("vectors.bin")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let (_dir, mut store) = open_temp();
        let payloads: Vec<&[u8]> = vec![b"{\"a\":1}", b"{\"a\":2}", b"{\"a\":3}"];
        let ids = store.insert_batch(&payloads).unwrap();
        let ids: Vec<u32> = ids.into_iter().flatten().collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let (_dir, mut store) = open_temp();
        let first = store.insert_batch(&[b"{}" as &[u8]]).unwrap()[0].unwrap();
        store.delete_ids(&[first]).unwrap();
        let second = store.insert_batch(&[b"{}" as &[u8]]).unwrap()[0].unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_fetch_many_backfills_missing() {
        let (_dir, mut store) = open_temp();
        let id = store.insert_batch(&[b"{\"k\":true}" as &[u8]]).unwrap()[0].unwrap();

        let map = store.fetch_many(&[id, 9999]).unwrap();
        assert_eq!(map[&id], b"{\"k\":true}".to_vec());
        assert_eq!(map[&9999], b"{}".to_vec());
    }

    #[test]
    fn test_fetch_many_over_param_limit() {
        let (_dir, mut store) = open_temp();
        let payloads: Vec<Vec<u8>> = (0..1500).map(|i| format!("{{\"i\":{}}}", i).into_bytes()).collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let ids: Vec<u32> = store.insert_batch(&refs).unwrap().into_iter().flatten().collect();
        assert_eq!(ids.len(), 1500);

        let map = store.fetch_many(&ids).unwrap();
        assert_eq!(map.len(), 1500);
        assert_eq!(map[&ids[0]], payloads[0]);
        assert_eq!(map[&ids[1499]], payloads[1499]);
    }

    #[test]
    fn test_filter_ids() {
        let (_dir, mut store) = open_temp();
        store
            .insert_batch(&[
                b"{\"tag\":\"a\"}" as &[u8],
                b"{\"tag\":\"b\"}",
                b"{\"tag\":\"a\"}",
            ])
            .unwrap();
        let ids = store
            .filter_ids("1=1 AND json_extract(payload, '$.tag') = 'a'")
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_delete_ids_batched() {
        let (_dir, mut store) = open_temp();
        let payloads: Vec<Vec<u8>> = (0..1200).map(|i| format!("{{\"i\":{}}}", i).into_bytes()).collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let ids: Vec<u32> = store.insert_batch(&refs).unwrap().into_iter().flatten().collect();

        let deleted = store.delete_ids(&ids).unwrap();
        assert_eq!(deleted, 1200);
        assert!(store.filter_ids("1=1").unwrap().is_empty());
    }

    #[test]
    fn test_update_batch_reports_matches() {
        let (_dir, mut store) = open_temp();
        let id = store.insert_batch(&[b"{\"v\":1}" as &[u8]]).unwrap()[0].unwrap();

        let matched = store
            .update_batch(&[(id, b"{\"v\":2}" as &[u8]), (424242, b"{}" as &[u8])])
            .unwrap();
        assert_eq!(matched, vec![true, false]);

        let map = store.fetch_many(&[id]).unwrap();
        assert_eq!(map[&id], b"{\"v\":2}".to_vec());
    }

    #[test]
    fn test_non_utf8_payload_roundtrip() {
        let (_dir, mut store) = open_temp();
        let raw: &[u8] = &[0xff, 0xfe, 0x00, 0x42];
        let id = store.insert_batch(&[raw]).unwrap()[0].unwrap();
        let map = store.fetch_many(&[id]).unwrap();
        assert_eq!(map[&id], raw.to_vec());
    }
}

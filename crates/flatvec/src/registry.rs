//! Process-wide connection registry.
//!
//! One connection exists per file path at a time; every operation routes
//! through the registered instance so the per-connection locks actually
//! serialize access. The map is lazily initialized and append-only: nothing
//! evicts a connection before process exit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::connection::Connection;
use crate::error::{FlatVecError, FlatVecResult};

static CONNECTIONS: OnceLock<Mutex<HashMap<PathBuf, Arc<Connection>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<Connection>>> {
    CONNECTIONS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registry keys are absolute paths so `a.db` and `./a.db` share one
/// connection.
fn normalize_path(path: &Path) -> FlatVecResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Open (or fetch) the connection for `path`.
///
/// When a connection already exists the caller's `dimensions` is ignored —
/// the stored dimension count is authoritative. Otherwise both underlying
/// files are opened (created if absent), the header is patched if this is
/// the first time the dimension count is known, and the connection is
/// registered.
pub fn connect(path: impl AsRef<Path>, dimensions: u32) -> FlatVecResult<Arc<Connection>> {
    let key = normalize_path(path.as_ref())?;
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = map.get(&key) {
        return Ok(Arc::clone(existing));
    }
    let connection = Arc::new(Connection::open(&key, dimensions)?);
    map.insert(key, Arc::clone(&connection));
    Ok(connection)
}

/// Fetch the connection registered for `path`.
pub fn get(path: impl AsRef<Path>) -> FlatVecResult<Arc<Connection>> {
    let key = normalize_path(path.as_ref())?;
    let map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map.get(&key)
        .cloned()
        .ok_or_else(|| FlatVecError::NotFound(key.display().to_string()))
}

/// Re-open the vector file handle of a registered connection.
pub fn refresh_connection(path: impl AsRef<Path>) -> FlatVecResult<()> {
    get(path)?.reopen_vector_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_is_idempotent_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.vec");

        let first = connect(&path, 4).unwrap();
        // A second connect with a different dimension count hands back the
        // same connection; the stored value wins.
        let second = connect(&path, 99).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.dimensions(), 4);
    }

    #[test]
    fn test_get_unknown_path_is_not_found() {
        match get("/nonexistent/never-registered.vec") {
            Err(FlatVecError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|c| c.dimensions())),
        }
    }
}

//! Local Store Adapter: durable snapshots of cart line lists.
//!
//! Two independent snapshots exist: the guest cart (fixed key) and a
//! per-identity cache of the last-known authenticated cart, so switching
//! accounts on the same device never reads another identity's cache.
//!
//! Durability here is best-effort, not authoritative: a corrupt or missing
//! snapshot reads as an empty list, and a failed write is logged and
//! forgotten. The remote cart is the durable truth once authenticated.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use store404_core::UserId;

use crate::cart::types::CartLine;

/// Store key for the guest snapshot.
const GUEST_KEY: &str = "guest";

/// Errors internal to snapshot I/O. Never escape the adapter.
#[derive(Debug, Error)]
enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Durable key-value persistence for cart snapshots.
///
/// Pure read/write; callers supply well-formed lines.
pub trait CartStore: Send + Sync + 'static {
    /// Read the guest cart snapshot.
    fn read_guest(&self) -> Vec<CartLine>;

    /// Replace the guest cart snapshot.
    fn write_guest(&self, lines: &[CartLine]);

    /// Read the cached snapshot for an authenticated identity.
    fn read_authenticated(&self, user: UserId) -> Vec<CartLine>;

    /// Replace the cached snapshot for an authenticated identity.
    fn write_authenticated(&self, user: UserId, lines: &[CartLine]);
}

/// On-disk snapshot format.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    /// Write timestamp, for diagnostics only.
    saved_at: DateTime<Utc>,
    lines: Vec<CartLine>,
}

/// File-backed store: one JSON file per key under a cache directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub const fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read_key(&self, key: &str) -> Vec<CartLine> {
        match self.try_read(key) {
            Ok(lines) => lines,
            Err(e) => {
                // Corrupt snapshots read as empty, never as an error.
                warn!(key, error = %e, "unreadable cart snapshot; treating as empty");
                Vec::new()
            }
        }
    }

    fn try_read(&self, key: &str) -> Result<Vec<CartLine>, StoreError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        Ok(snapshot.lines)
    }

    fn write_key(&self, key: &str, lines: &[CartLine]) {
        if let Err(e) = self.try_write(key, lines) {
            warn!(key, error = %e, "failed to persist cart snapshot");
        }
    }

    fn try_write(&self, key: &str, lines: &[CartLine]) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            lines: lines.to_vec(),
        };
        let raw = serde_json::to_string_pretty(&snapshot)?;
        fs::write(self.path(key), raw)?;
        Ok(())
    }
}

/// Identity-derived store key.
fn user_key(user: UserId) -> String {
    format!("user-{user}")
}

impl CartStore for JsonFileStore {
    fn read_guest(&self) -> Vec<CartLine> {
        self.read_key(GUEST_KEY)
    }

    fn write_guest(&self, lines: &[CartLine]) {
        self.write_key(GUEST_KEY, lines);
    }

    fn read_authenticated(&self, user: UserId) -> Vec<CartLine> {
        self.read_key(&user_key(user))
    }

    fn write_authenticated(&self, user: UserId, lines: &[CartLine]) {
        self.write_key(&user_key(user), lines);
    }
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keys: Mutex<HashMap<String, Vec<CartLine>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CartStore for MemoryStore {
    fn read_guest(&self) -> Vec<CartLine> {
        self.keys
            .lock()
            .map(|k| k.get(GUEST_KEY).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn write_guest(&self, lines: &[CartLine]) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.insert(GUEST_KEY.to_string(), lines.to_vec());
        }
    }

    fn read_authenticated(&self, user: UserId) -> Vec<CartLine> {
        self.keys
            .lock()
            .map(|k| k.get(&user_key(user)).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn write_authenticated(&self, user: UserId, lines: &[CartLine]) {
        if let Ok(mut keys) = self.keys.lock() {
            keys.insert(user_key(user), lines.to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::types::{LineId, LineOrigin};
    use store404_core::ProductId;

    fn line(product: i64, quantity: u32) -> CartLine {
        CartLine {
            id: LineId::new_local(),
            product_id: ProductId::new(product),
            quantity,
            price: None,
            product: None,
            origin: LineOrigin::Guest,
        }
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().to_path_buf());

        assert!(store.read_guest().is_empty());

        let lines = vec![line(1, 2), line(2, 1)];
        store.write_guest(&lines);
        assert_eq!(store.read_guest(), lines);

        // Guest and per-user snapshots are independent
        let user = UserId::new(9);
        assert!(store.read_authenticated(user).is_empty());
        store.write_authenticated(user, &lines[..1]);
        assert_eq!(store.read_authenticated(user).len(), 1);
        assert_eq!(store.read_guest().len(), 2);
    }

    #[test]
    fn test_file_store_isolates_identities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().to_path_buf());

        store.write_authenticated(UserId::new(1), &[line(1, 1)]);
        assert!(store.read_authenticated(UserId::new(2)).is_empty());
    }

    #[test]
    fn test_corrupt_snapshot_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileStore::new(dir.path().to_path_buf());

        std::fs::write(dir.path().join("guest.json"), "{not json").expect("write");
        assert!(store.read_guest().is_empty());
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.write_guest(&[line(5, 3)]);
        assert_eq!(store.read_guest().len(), 1);
        store.write_guest(&[]);
        assert!(store.read_guest().is_empty());
    }
}

//! Per-email link queues.
//!
//! Each email address owns one record `{email, links}` holding the links submitted
//! since its last digest. Two backends exist: one JSON file per address, and a sled
//! tree keyed by address. Both serialize read-modify-write cycles per key.

use crate::config::{StorageBackend, StorageConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("database error: {0}")]
    DbError(#[from] sled::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// The pending links of one user, in submission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLinks {
    pub email: String,
    #[serde(default)]
    pub links: Vec<String>,
}

impl UserLinks {
    pub fn empty(email: &str) -> Self {
        Self {
            email: email.to_string(),
            links: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Take all links if at least `threshold` are pending.
    ///
    /// A threshold of zero takes any non-empty queue.
    fn take_if_full(&mut self, threshold: usize) -> Option<UserLinks> {
        if self.links.is_empty() || self.links.len() < threshold {
            return None;
        }
        Some(UserLinks {
            email: self.email.clone(),
            links: std::mem::take(&mut self.links),
        })
    }
}

/// Storage key for an email address: `@` becomes `_at_`, `.` becomes `_`
pub fn sanitize_key(email: &str) -> String {
    email.replace('@', "_at_").replace('.', "_")
}

/// Persistence of per-email link queues.
///
/// Implementations must make each call atomic with respect to other calls for
/// the same email.
pub trait LinkStore: Send + Sync {
    /// Append a link and return the updated queue
    fn append(&self, email: &str, url: &str) -> Result<UserLinks, StorageError>;

    /// Number of pending links, zero for unknown addresses
    fn count(&self, email: &str) -> Result<usize, StorageError>;

    /// Empty the queue and return its previous contents if it holds at least
    /// `threshold` links
    fn drain(&self, email: &str, threshold: usize) -> Result<Option<UserLinks>, StorageError>;
}

/// Open the store selected in the configuration
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn LinkStore>, StorageError> {
    let path = config.links_path();
    Ok(match config.backend {
        StorageBackend::File => Arc::new(FileLinkStore::open(path)?),
        StorageBackend::Sled => Arc::new(SledLinkStore::open(path)?),
    })
}

/// Decode a stored record, treating anything unreadable as an empty queue
fn decode(email: &str, data: Option<&[u8]>) -> UserLinks {
    let Some(data) = data else {
        return UserLinks::empty(email);
    };
    match serde_json::from_slice::<UserLinks>(data) {
        Ok(mut links) => {
            links.email = email.to_string();
            links
        }
        Err(e) => {
            warn!(email, error = %e, "corrupt link record, starting a new queue");
            UserLinks::empty(email)
        }
    }
}

/// JSON-file store: `<root>/<sanitized email>.json`
pub struct FileLinkStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileLinkStore {
    /// Open or create a store rooted at the given directory
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.to_string()).or_default().clone()
    }

    fn read(&self, email: &str, path: &Path) -> UserLinks {
        match std::fs::read(path) {
            Ok(data) => decode(email, Some(&data)),
            Err(e) if e.kind() == ErrorKind::NotFound => UserLinks::empty(email),
            Err(e) => {
                warn!(email, path = %path.display(), error = %e, "unreadable link record");
                UserLinks::empty(email)
            }
        }
    }

    fn write(&self, path: &Path, links: &UserLinks) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(links)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Run `f` on the record under the per-key lock, writing it back if it changed
    fn modify<T>(
        &self,
        email: &str,
        f: impl FnOnce(&mut UserLinks) -> T,
    ) -> Result<(T, UserLinks), StorageError> {
        let key = sanitize_key(email);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let path = self.record_path(&key);
        let before = self.read(email, &path);
        let mut after = before.clone();
        let out = f(&mut after);
        if after != before {
            self.write(&path, &after)?;
        }
        Ok((out, after))
    }
}

impl LinkStore for FileLinkStore {
    fn append(&self, email: &str, url: &str) -> Result<UserLinks, StorageError> {
        let ((), links) = self.modify(email, |q| q.links.push(url.to_string()))?;
        debug!(email, pending = links.len(), "link appended");
        Ok(links)
    }

    fn count(&self, email: &str) -> Result<usize, StorageError> {
        let path = self.record_path(&sanitize_key(email));
        Ok(self.read(email, &path).len())
    }

    fn drain(&self, email: &str, threshold: usize) -> Result<Option<UserLinks>, StorageError> {
        let (taken, _) = self.modify(email, |q| q.take_if_full(threshold))?;
        Ok(taken)
    }
}

/// Sled-based store, one key per sanitized email.
///
/// Updates use compare-and-swap, so concurrent writers retry instead of
/// overwriting each other.
pub struct SledLinkStore {
    db: sled::Db,
}

impl SledLinkStore {
    /// Open or create storage at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn modify<T>(
        &self,
        email: &str,
        mut f: impl FnMut(&mut UserLinks) -> T,
    ) -> Result<(T, UserLinks), StorageError> {
        let key = sanitize_key(email);
        loop {
            let current = self.db.get(key.as_bytes())?;
            let before = decode(email, current.as_deref());
            let mut after = before.clone();
            let out = f(&mut after);
            if after == before {
                return Ok((out, after));
            }

            let value = serde_json::to_vec(&after)?;
            if self
                .db
                .compare_and_swap(key.as_bytes(), current, Some(value))?
                .is_ok()
            {
                self.db.flush()?;
                return Ok((out, after));
            }
            debug!(email, "concurrent update, retrying");
        }
    }
}

impl LinkStore for SledLinkStore {
    fn append(&self, email: &str, url: &str) -> Result<UserLinks, StorageError> {
        let ((), links) = self.modify(email, |q| q.links.push(url.to_string()))?;
        debug!(email, pending = links.len(), "link appended");
        Ok(links)
    }

    fn count(&self, email: &str) -> Result<usize, StorageError> {
        let current = self.db.get(sanitize_key(email).as_bytes())?;
        Ok(decode(email, current.as_deref()).len())
    }

    fn drain(&self, email: &str, threshold: usize) -> Result<Option<UserLinks>, StorageError> {
        let (taken, _) = self.modify(email, |q| q.take_if_full(threshold))?;
        Ok(taken)
    }
}

//! Build cache service.
//!
//! One [`BuildCache`] is created per build and shared by every worker. It
//! memoizes file modification times and content hashes process-wide, and it
//! owns the on-disk hash store that lets the next run tell a real edit from
//! a touched file.
//!
//! ## On-disk layout
//!
//! Each project has its own store directory. A file's persisted hash lives at
//! `<store>/hashes/<sha256 of absolute path>/<file name>.sha256`, so two files
//! with the same name never collide.

use crate::staleness::normalize_source;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Stable identifier for an absolute path.
pub fn path_key(path: &Path) -> String {
    let mut key = sha256_hex(path.to_string_lossy().as_bytes());
    key.truncate(32);
    key
}

#[derive(Debug, Default)]
pub struct BuildCache {
    mtimes: DashMap<PathBuf, Option<SystemTime>>,
    content_hashes: DashMap<PathBuf, Option<String>>,
    stored_hashes: DashMap<PathBuf, Option<String>>,
    changed: DashMap<(PathBuf, PathBuf), bool>,
    writes: AtomicUsize,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modification time of a source or header, read once per run.
    pub fn mtime(&self, path: &Path) -> Option<SystemTime> {
        if let Some(hit) = self.mtimes.get(path) {
            return *hit;
        }
        let value = fs::metadata(path).and_then(|m| m.modified()).ok();
        *self.mtimes.entry(path.to_path_buf()).or_insert(value)
    }

    /// Hash of the file's content with comments and blank space removed.
    pub fn content_hash(&self, path: &Path) -> Option<String> {
        if let Some(hit) = self.content_hashes.get(path) {
            return hit.clone();
        }
        let value = fs::read(path)
            .ok()
            .map(|bytes| sha256_hex(normalize_source(&String::from_utf8_lossy(&bytes)).as_bytes()));
        self.content_hashes
            .entry(path.to_path_buf())
            .or_insert(value)
            .clone()
    }

    pub fn hash_file(store: &Path, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        store
            .join("hashes")
            .join(path_key(path))
            .join(format!("{}.sha256", name))
    }

    /// The hash persisted for `path` in `store` by a previous run.
    pub fn stored_hash(&self, store: &Path, path: &Path) -> Option<String> {
        let file = Self::hash_file(store, path);
        if let Some(hit) = self.stored_hashes.get(&file) {
            return hit.clone();
        }
        let value = fs::read_to_string(&file)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        self.stored_hashes.entry(file).or_insert(value).clone()
    }

    /// Whether the content differs from what `store` last recorded. A file
    /// with no recorded hash counts as changed.
    pub fn has_changed(&self, store: &Path, path: &Path) -> bool {
        let key = (store.to_path_buf(), path.to_path_buf());
        if let Some(hit) = self.changed.get(&key) {
            return *hit;
        }
        let current = self.content_hash(path);
        let changed = current.is_none() || current != self.stored_hash(store, path);
        *self.changed.entry(key).or_insert(changed)
    }

    /// Record the current hash of `path`. Returns `Ok(false)` when the
    /// stored value already matched and nothing was written.
    pub fn persist_hash(&self, store: &Path, path: &Path) -> io::Result<bool> {
        let Some(current) = self.content_hash(path) else {
            return Ok(false);
        };
        if self.stored_hash(store, path).as_deref() == Some(current.as_str()) {
            return Ok(false);
        }
        let file = Self::hash_file(store, path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, &current)?;
        self.stored_hashes.insert(file, Some(current));
        self.changed
            .insert((store.to_path_buf(), path.to_path_buf()), false);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Number of hash files written through this cache.
    pub fn hash_writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Drop the memoized mtime of a file this process rewrote.
    pub fn forget(&self, path: &Path) {
        self.mtimes.remove(path);
        self.content_hashes.remove(path);
        self.changed.retain(|(_, p), _| p != path);
    }
}

/// Compare the stored base command fingerprint with `current`, rewriting the
/// file when it differs. Returns true when the fingerprint changed.
pub fn refresh_fingerprint(file: &Path, current: &str) -> io::Result<bool> {
    let previous = fs::read_to_string(file).ok();
    if previous.as_deref() == Some(current) {
        return Ok(false);
    }
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(file, current)?;
    Ok(true)
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Cache store
//!
//! Named gzip-compressed tar archives under the cache base directory, with
//! a single `.metadata.json` sidecar keyed by cache name. Publishing is
//! atomic: archives are written to a `.tmp` path and renamed into place, so
//! a concurrent restore never sees a partial archive.

use chrono::{DateTime, Duration, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{BbplError, BbplResult};

/// Sidecar file holding one entry per cache name
const METADATA_FILE: &str = ".metadata.json";

/// Caches older than this are dropped by [`CacheStore::cleanup_old`]
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;

/// Well-known cache names and the paths they archive.
/// `~` expands to the running user's home; other relative paths resolve
/// against the workspace.
const PREDEFINED_CACHES: [(&str, &str); 8] = [
    ("node", "node_modules"),
    ("npm", "~/.npm"),
    ("yarn", "~/.cache/yarn"),
    ("pip-cache", "~/.cache/pip"),
    ("composer", "vendor"),
    ("gradle", "~/.gradle/caches"),
    ("maven", "~/.m2/repository"),
    ("docker", "/var/lib/docker"),
];

/// Metadata for one cache archive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub name: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// SHA-256 of the archive bytes
    pub archive_hash: String,
    /// SHA-256 of the source tree (names + contents, sorted walk)
    pub source_hash: String,
}

/// Content-archived, per-name cache
pub struct CacheStore {
    base: PathBuf,
    enabled: bool,
}

impl CacheStore {
    /// Open (and create) the cache directory
    pub fn new(base: impl Into<PathBuf>, enabled: bool) -> BbplResult<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)
            .map_err(|e| BbplError::filesystem(&base, e))?;
        Ok(Self { base, enabled })
    }

    /// Resolve a cache name to the path it archives
    pub fn resolve_path(name: &str, workspace: &Path) -> PathBuf {
        let raw = PREDEFINED_CACHES
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, path)| *path)
            .unwrap_or(name);

        if let Some(rest) = raw.strip_prefix("~/") {
            return dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(rest);
        }
        let raw = Path::new(raw);
        if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            workspace.join(raw)
        }
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.base.join(format!("{name}.tar.gz"))
    }

    /// Restore `name` into `target`. Returns false on a miss; extraction
    /// failures are logged and reported as misses. A disabled store always
    /// misses.
    pub fn restore(&self, name: &str, target: &Path) -> bool {
        if !self.enabled {
            return false;
        }
        let archive = self.archive_path(name);
        if !archive.exists() {
            debug!("cache miss: {name}");
            return false;
        }

        // the archive is rooted at the target's basename
        let root = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if let Err(e) = std::fs::create_dir_all(&root) {
            warn!("cache '{name}': cannot create {}: {e}", root.display());
            return false;
        }

        let result = File::open(&archive).and_then(|file| {
            let mut unpacker = tar::Archive::new(GzDecoder::new(file));
            unpacker.unpack(&root)
        });

        match result {
            Ok(()) => {
                self.touch(name);
                info!("cache hit: {name}");
                true
            }
            Err(e) => {
                warn!("cache '{name}': extraction failed, treating as miss: {e}");
                false
            }
        }
    }

    /// Archive `source` under `name`. A missing source or a disabled store
    /// is a no-op.
    pub fn save(&self, name: &str, source: &Path) -> BbplResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if !source.exists() {
            debug!("cache '{name}': source {} absent, skipping", source.display());
            return Ok(());
        }

        let archive = self.archive_path(name);
        let tmp = self.base.join(format!("{name}.tar.gz.tmp"));

        let file = File::create(&tmp).map_err(|e| BbplError::filesystem(&tmp, e))?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.follow_symlinks(false);

        let root_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| name.to_string());
        builder
            .append_dir_all(&root_name, source)
            .map_err(|e| BbplError::filesystem(source, e))?;
        builder
            .into_inner()
            .and_then(GzEncoder::finish)
            .map_err(|e| BbplError::filesystem(&tmp, e))?;

        let archive_hash = hash_file(&tmp).map_err(|e| BbplError::filesystem(&tmp, e))?;
        let size = std::fs::metadata(&tmp)
            .map_err(|e| BbplError::filesystem(&tmp, e))?
            .len();

        // publish: readers see the old archive or the new one, never a partial
        std::fs::rename(&tmp, &archive).map_err(|e| BbplError::filesystem(&archive, e))?;

        let source_hash = hash_tree(source);
        let now = Utc::now();
        let mut metadata = self.load_metadata();
        let created = metadata
            .get(name)
            .map(|entry| entry.created)
            .unwrap_or(now);
        metadata.insert(
            name.to_string(),
            CacheEntry {
                name: name.to_string(),
                size,
                created,
                last_accessed: now,
                archive_hash,
                source_hash,
            },
        );
        self.store_metadata(&metadata)?;

        info!("cache saved: {name} ({size} bytes)");
        Ok(())
    }

    /// Remove one archive, or every archive when `name` is `None`.
    /// Disabled store → no-op.
    pub fn clear(&self, name: Option<&str>) -> BbplResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut metadata = self.load_metadata();

        match name {
            Some(name) => {
                remove_quiet(&self.archive_path(name))?;
                metadata.remove(name);
            }
            None => {
                let entries = std::fs::read_dir(&self.base)
                    .map_err(|e| BbplError::filesystem(&self.base, e))?;
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.to_string_lossy().ends_with(".tar.gz") {
                        remove_quiet(&path)?;
                    }
                }
                metadata.clear();
            }
        }

        self.store_metadata(&metadata)
    }

    /// Drop caches not accessed within `max_age`; returns how many were removed
    pub fn cleanup_old(&self, max_age: Duration) -> BbplResult<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let cutoff = Utc::now() - max_age;
        let mut metadata = self.load_metadata();

        let stale: Vec<String> = metadata
            .values()
            .filter(|entry| entry.last_accessed < cutoff)
            .map(|entry| entry.name.clone())
            .collect();

        for name in &stale {
            remove_quiet(&self.archive_path(name))?;
            metadata.remove(name);
            info!("cache expired: {name}");
        }

        self.store_metadata(&metadata)?;
        Ok(stale.len())
    }

    /// Current sidecar entries, for display
    pub fn entries(&self) -> Vec<CacheEntry> {
        self.load_metadata().into_values().collect()
    }

    fn touch(&self, name: &str) {
        let mut metadata = self.load_metadata();
        if let Some(entry) = metadata.get_mut(name) {
            entry.last_accessed = Utc::now();
            if let Err(e) = self.store_metadata(&metadata) {
                warn!("cache '{name}': metadata update failed: {e}");
            }
        }
    }

    fn metadata_path(&self) -> PathBuf {
        self.base.join(METADATA_FILE)
    }

    fn load_metadata(&self) -> BTreeMap<String, CacheEntry> {
        let path = self.metadata_path();
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn store_metadata(&self, metadata: &BTreeMap<String, CacheEntry>) -> BbplResult<()> {
        let path = self.metadata_path();
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, json).map_err(|e| BbplError::filesystem(&path, e))
    }
}

fn remove_quiet(path: &Path) -> BbplResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BbplError::filesystem(path, e)),
    }
}

/// SHA-256 of a file's bytes, streamed
fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex_digest(hasher))
}

/// SHA-256 over a source tree: entries in sorted order, each contributing
/// its name then its contents (files) or its own walk (directories).
/// Unreadable entries are skipped so the hash of an attempt is stable.
pub fn hash_tree(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hash_tree_into(&mut hasher, root);
    hex_digest(hasher)
}

fn hash_tree_into(hasher: &mut Sha256, dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if let Some(name) = path.file_name() {
            hasher.update(name.to_string_lossy().as_bytes());
        }
        if path.is_dir() {
            hash_tree_into(hasher, &path);
        } else if let Ok(contents) = std::fs::read(&path) {
            hasher.update(&contents);
        }
    }
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tree(root: &Path) {
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("top.txt"), b"top contents").unwrap();
        std::fs::write(root.join("sub/nested.txt"), b"nested contents").unwrap();
    }

    #[test]
    fn test_save_restore_round_trip() {
        let store_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), true).unwrap();

        let source = work.path().join("node_modules");
        write_tree(&source);
        store.save("node", &source).unwrap();

        let other = TempDir::new().unwrap();
        let target = other.path().join("node_modules");
        assert!(store.restore("node", &target));

        assert_eq!(
            std::fs::read(target.join("top.txt")).unwrap(),
            b"top contents"
        );
        assert_eq!(
            std::fs::read(target.join("sub/nested.txt")).unwrap(),
            b"nested contents"
        );
    }

    #[test]
    fn test_restore_missing_returns_false() {
        let store_dir = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), true).unwrap();
        assert!(!store.restore("nope", Path::new("/tmp/anywhere")));
    }

    #[test]
    fn test_save_missing_source_is_noop() {
        let store_dir = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), true).unwrap();
        store
            .save("ghost", Path::new("/definitely/not/here"))
            .unwrap();
        assert!(!store_dir.path().join("ghost.tar.gz").exists());
    }

    #[test]
    fn test_save_publishes_atomically() {
        let store_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), true).unwrap();

        let source = work.path().join("vendor");
        write_tree(&source);
        store.save("composer", &source).unwrap();

        assert!(store_dir.path().join("composer.tar.gz").exists());
        // no temp file left behind after publish
        assert!(!store_dir.path().join("composer.tar.gz.tmp").exists());
    }

    #[test]
    fn test_metadata_records_hashes_and_access() {
        let store_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), true).unwrap();

        let source = work.path().join("node_modules");
        write_tree(&source);
        store.save("node", &source).unwrap();

        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        let saved = entries[0].clone();
        assert_eq!(saved.name, "node");
        assert_eq!(saved.archive_hash.len(), 64);
        assert_eq!(saved.source_hash.len(), 64);
        assert!(saved.size > 0);

        let target = TempDir::new().unwrap().path().join("node_modules");
        let before = saved.last_accessed;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(store.restore("node", &target));
        let touched = store.entries().remove(0);
        assert!(touched.last_accessed > before);
    }

    #[test]
    fn test_clear_single_and_all() {
        let store_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), true).unwrap();

        for name in ["node", "composer"] {
            let source = work.path().join(name);
            write_tree(&source);
            store.save(name, &source).unwrap();
        }

        store.clear(Some("node")).unwrap();
        assert!(!store_dir.path().join("node.tar.gz").exists());
        assert!(store_dir.path().join("composer.tar.gz").exists());
        assert_eq!(store.entries().len(), 1);

        store.clear(None).unwrap();
        assert!(!store_dir.path().join("composer.tar.gz").exists());
        assert!(store.entries().is_empty());

        // clearing an absent cache is not an error
        store.clear(Some("never-existed")).unwrap();
    }

    #[test]
    fn test_cleanup_old_drops_stale_entries() {
        let store_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), true).unwrap();

        let source = work.path().join("node_modules");
        write_tree(&source);
        store.save("node", &source).unwrap();

        // age the entry by rewriting the sidecar
        let mut metadata = store.load_metadata();
        metadata.get_mut("node").unwrap().last_accessed =
            Utc::now() - Duration::days(30);
        store.store_metadata(&metadata).unwrap();

        let removed = store
            .cleanup_old(Duration::days(DEFAULT_MAX_AGE_DAYS))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!store_dir.path().join("node.tar.gz").exists());
    }

    #[test]
    fn test_disabled_store_is_inert() {
        let store_dir = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let store = CacheStore::new(store_dir.path(), false).unwrap();

        let source = work.path().join("node_modules");
        write_tree(&source);
        store.save("node", &source).unwrap();
        assert!(!store_dir.path().join("node.tar.gz").exists());

        let target = TempDir::new().unwrap().path().join("node_modules");
        assert!(!store.restore("node", &target));
        assert_eq!(store.cleanup_old(Duration::days(1)).unwrap(), 0);
        store.clear(None).unwrap();
    }

    #[test]
    fn test_resolve_path_predefined_and_literal() {
        let workspace = Path::new("/work/project");

        assert_eq!(
            CacheStore::resolve_path("node", workspace),
            workspace.join("node_modules")
        );
        assert_eq!(
            CacheStore::resolve_path("docker", workspace),
            PathBuf::from("/var/lib/docker")
        );
        assert_eq!(
            CacheStore::resolve_path("my/custom-dir", workspace),
            workspace.join("my/custom-dir")
        );

        let home = dirs::home_dir().unwrap();
        assert_eq!(
            CacheStore::resolve_path("npm", workspace),
            home.join(".npm")
        );
    }

    #[test]
    fn test_tree_hash_depends_on_names_and_contents() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write_tree(a.path());
        write_tree(b.path());
        assert_eq!(hash_tree(a.path()), hash_tree(b.path()));

        std::fs::write(b.path().join("top.txt"), b"changed").unwrap();
        assert_ne!(hash_tree(a.path()), hash_tree(b.path()));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Artifact store
//!
//! Copies files matched by a step's artifact patterns into a per-step
//! directory, and restores them into the workspace for later steps.
//! Restore failures are non-fatal; a later step simply runs without the
//! missing files.

use chrono::{DateTime, Utc};
use glob::MatchOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::errors::{BbplError, BbplResult};

/// Per-step sidecar file name
const METADATA_FILE: &str = ".metadata.json";

/// Metadata written next to each step's artifact copies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub step_name: String,
    pub timestamp: DateTime<Utc>,
    pub patterns: Vec<String>,
    pub files: Vec<PathBuf>,
    pub total_size: u64,
}

/// Per-step file collection by glob
pub struct ArtifactStore {
    base: PathBuf,
    enabled: bool,
}

impl ArtifactStore {
    /// Open (and create) the artifact directory
    pub fn new(base: impl Into<PathBuf>, enabled: bool) -> BbplResult<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)
            .map_err(|e| BbplError::filesystem(&base, e))?;
        Ok(Self { base, enabled })
    }

    /// Directory a step's artifacts land in
    pub fn step_dir(&self, step_name: &str) -> PathBuf {
        self.base.join(sanitize_step_name(step_name))
    }

    /// Collect files matching `patterns` under `source_dir` into the step's
    /// directory. Returns how many files were stored.
    pub fn save(
        &self,
        patterns: &[String],
        source_dir: &Path,
        step_name: &str,
    ) -> BbplResult<usize> {
        if !self.enabled {
            return Ok(0);
        }

        let step_dir = self.step_dir(step_name);
        std::fs::create_dir_all(&step_dir)
            .map_err(|e| BbplError::filesystem(&step_dir, e))?;

        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            // dotfiles never match a wildcard
            require_literal_leading_dot: true,
        };

        let mut files = Vec::new();
        let mut total_size = 0u64;

        for pattern in patterns {
            let absolute = source_dir.join(pattern);
            let matches = glob::glob_with(&absolute.to_string_lossy(), options)?;
            for path in matches.flatten() {
                if !path.is_file() {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(source_dir) else {
                    continue;
                };
                let destination = step_dir.join(relative);
                if let Some(parent) = destination.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| BbplError::filesystem(parent, e))?;
                }
                let copied = std::fs::copy(&path, &destination)
                    .map_err(|e| BbplError::filesystem(&path, e))?;
                total_size += copied;
                files.push(relative.to_path_buf());
            }
        }

        files.sort();
        let count = files.len();
        let metadata = ArtifactMetadata {
            step_name: step_name.to_string(),
            timestamp: Utc::now(),
            patterns: patterns.to_vec(),
            files,
            total_size,
        };
        let metadata_path = step_dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(&metadata)?;
        std::fs::write(&metadata_path, json)
            .map_err(|e| BbplError::filesystem(&metadata_path, e))?;

        info!("artifacts saved for '{step_name}': {count} file(s), {total_size} bytes");
        Ok(count)
    }

    /// Copy artifacts back into `target_dir`, preserving relative paths.
    /// With `step_name` restores one step's artifacts; without, every
    /// step's. Failures are logged and swallowed.
    pub fn restore(&self, target_dir: &Path, step_name: Option<&str>) -> usize {
        if !self.enabled {
            return 0;
        }

        let step_dirs: Vec<PathBuf> = match step_name {
            Some(name) => vec![self.step_dir(name)],
            None => match std::fs::read_dir(&self.base) {
                Ok(entries) => entries
                    .flatten()
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect(),
                Err(e) => {
                    warn!("artifact restore skipped: {e}");
                    return 0;
                }
            },
        };

        let mut restored = 0;
        for dir in step_dirs {
            if !dir.exists() {
                continue;
            }
            restored += copy_tree(&dir, target_dir);
        }
        if restored > 0 {
            debug!("restored {restored} artifact file(s)");
        }
        restored
    }

    /// Remove every stored artifact. Disabled store → no-op.
    pub fn clear(&self) -> BbplResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let entries = std::fs::read_dir(&self.base)
            .map_err(|e| BbplError::filesystem(&self.base, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|e| BbplError::filesystem(&path, e))?;
        }
        Ok(())
    }

    /// Metadata for each step directory, for display
    pub fn entries(&self) -> Vec<ArtifactMetadata> {
        let Ok(dirs) = std::fs::read_dir(&self.base) else {
            return Vec::new();
        };
        let mut entries: Vec<ArtifactMetadata> = dirs
            .flatten()
            .filter_map(|entry| {
                let text =
                    std::fs::read_to_string(entry.path().join(METADATA_FILE)).ok()?;
                serde_json::from_str(&text).ok()
            })
            .collect();
        entries.sort_by(|a, b| a.step_name.cmp(&b.step_name));
        entries
    }
}

/// Copy every regular file under `from` into `to`, preserving relative
/// paths and skipping the metadata sidecar. Failures are logged.
fn copy_tree(from: &Path, to: &Path) -> usize {
    let mut copied = 0;
    let Ok(entries) = std::fs::read_dir(from) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy() == METADATA_FILE {
            continue;
        }
        let destination = to.join(&name);
        if path.is_dir() {
            if let Err(e) = std::fs::create_dir_all(&destination) {
                warn!("artifact restore: cannot create {}: {e}", destination.display());
                continue;
            }
            copied += copy_tree(&path, &destination);
        } else {
            if let Some(parent) = destination.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match std::fs::copy(&path, &destination) {
                Ok(_) => copied += 1,
                Err(e) => warn!(
                    "artifact restore: {} -> {}: {e}",
                    path.display(),
                    destination.display()
                ),
            }
        }
    }
    copied
}

/// Collapse a step name into a filesystem-safe directory name.
/// Idempotent; output always matches `[a-z0-9_-]*`.
pub fn sanitize_step_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_underscore = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c.to_ascii_lowercase());
            last_was_underscore = false;
        } else if !last_was_underscore {
            // anything else, underscores included, collapses to one '_'
            out.push('_');
            last_was_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace_with_build() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("build/a")).unwrap();
        std::fs::write(dir.path().join("build/a/b.txt"), b"artifact bytes").unwrap();
        std::fs::write(dir.path().join("build/a/skip.log"), b"log").unwrap();
        std::fs::write(dir.path().join("top.txt"), b"top").unwrap();
        dir
    }

    #[test]
    fn test_save_matches_glob_and_preserves_layout() {
        let store_dir = TempDir::new().unwrap();
        let workspace = workspace_with_build();
        let store = ArtifactStore::new(store_dir.path(), true).unwrap();

        let count = store
            .save(
                &["build/**/*.txt".to_string()],
                workspace.path(),
                "Build and test",
            )
            .unwrap();
        assert_eq!(count, 1);

        let step_dir = store.step_dir("Build and test");
        assert_eq!(step_dir.file_name().unwrap(), "build_and_test");
        assert!(step_dir.join("build/a/b.txt").exists());
        assert!(!step_dir.join("build/a/skip.log").exists());

        let metadata = store.entries().remove(0);
        assert_eq!(metadata.step_name, "Build and test");
        assert_eq!(metadata.files, vec![PathBuf::from("build/a/b.txt")]);
        assert!(metadata.total_size > 0);
    }

    #[test]
    fn test_restore_carries_files_into_new_workspace() {
        let store_dir = TempDir::new().unwrap();
        let workspace = workspace_with_build();
        let store = ArtifactStore::new(store_dir.path(), true).unwrap();
        store
            .save(&["build/**/*.txt".to_string()], workspace.path(), "step a")
            .unwrap();

        let fresh = TempDir::new().unwrap();
        let restored = store.restore(fresh.path(), None);
        assert_eq!(restored, 1);
        assert_eq!(
            std::fs::read(fresh.path().join("build/a/b.txt")).unwrap(),
            b"artifact bytes"
        );
        // the sidecar does not leak into the workspace
        assert!(!fresh.path().join(METADATA_FILE).exists());
    }

    #[test]
    fn test_restore_single_step_only() {
        let store_dir = TempDir::new().unwrap();
        let workspace = workspace_with_build();
        let store = ArtifactStore::new(store_dir.path(), true).unwrap();
        store
            .save(&["build/**/*.txt".to_string()], workspace.path(), "first")
            .unwrap();
        store
            .save(&["top.txt".to_string()], workspace.path(), "second")
            .unwrap();

        let fresh = TempDir::new().unwrap();
        let restored = store.restore(fresh.path(), Some("second"));
        assert_eq!(restored, 1);
        assert!(fresh.path().join("top.txt").exists());
        assert!(!fresh.path().join("build").exists());
    }

    #[test]
    fn test_dotfiles_do_not_match_wildcards() {
        let store_dir = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        std::fs::write(workspace.path().join(".hidden"), b"secret").unwrap();
        std::fs::write(workspace.path().join("shown.txt"), b"visible").unwrap();

        let store = ArtifactStore::new(store_dir.path(), true).unwrap();
        let count = store
            .save(&["*".to_string()], workspace.path(), "step")
            .unwrap();
        assert_eq!(count, 1);
        assert!(store.step_dir("step").join("shown.txt").exists());
        assert!(!store.step_dir("step").join(".hidden").exists());
    }

    #[test]
    fn test_clear_removes_everything() {
        let store_dir = TempDir::new().unwrap();
        let workspace = workspace_with_build();
        let store = ArtifactStore::new(store_dir.path(), true).unwrap();
        store
            .save(&["top.txt".to_string()], workspace.path(), "step")
            .unwrap();

        store.clear().unwrap();
        assert!(store.entries().is_empty());
        assert_eq!(std::fs::read_dir(store_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_disabled_store_is_inert() {
        let store_dir = TempDir::new().unwrap();
        let workspace = workspace_with_build();
        let store = ArtifactStore::new(store_dir.path(), false).unwrap();

        let saved = store
            .save(&["top.txt".to_string()], workspace.path(), "step")
            .unwrap();
        assert_eq!(saved, 0);
        assert_eq!(store.restore(workspace.path(), None), 0);
        store.clear().unwrap();
    }

    #[test]
    fn test_sanitize_step_name() {
        assert_eq!(sanitize_step_name("Build & Test!"), "build_test");
        assert_eq!(sanitize_step_name("  lots   of   spaces  "), "lots_of_spaces");
        assert_eq!(sanitize_step_name("already-clean_name"), "already-clean_name");
        assert_eq!(sanitize_step_name("___"), "");
    }

    #[test]
    fn test_sanitize_collapses_underscore_runs() {
        assert_eq!(sanitize_step_name("a__b"), "a_b");
        assert_eq!(sanitize_step_name("a _ b"), "a_b");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for name in ["Build & Test!", "weird///name", "UPPER case", "a_b-c9"] {
            let once = sanitize_step_name(name);
            assert_eq!(sanitize_step_name(&once), once);
            assert!(once.chars().all(|c| c.is_ascii_lowercase()
                || c.is_ascii_digit()
                || c == '_'
                || c == '-'));
        }
    }
}

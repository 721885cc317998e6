// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Persistent stores
//!
//! Caches survive across runs as named archives; artifacts carry files
//! between steps within and across runs.

pub mod artifact;
pub mod cache;

pub use artifact::{sanitize_step_name, ArtifactMetadata, ArtifactStore};
pub use cache::{hash_tree, CacheEntry, CacheStore, DEFAULT_MAX_AGE_DAYS};

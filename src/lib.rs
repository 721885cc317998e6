// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! # bbpl - Bitbucket Pipelines, locally
//!
//! `bbpl` executes a `bitbucket-pipelines.yml` against a local
//! Docker-compatible runtime, so pipelines can be reproduced without
//! pushing commits.
//!
//! ## Features
//!
//! - **Faithful model** - hyphen/camel key variants, step and parallel
//!   groups, images with credentials, caches, artifacts
//! - **Real isolation** - every step runs in its own container with the
//!   expected environment and resource limits
//! - **Caches and artifacts** - persisted across steps and runs with
//!   crash-safe archive publishing
//! - **Fail-fast parallelism** - concurrent steps with cancellation on the
//!   first failure
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate the pipeline file
//! bbpl validate
//!
//! # Run the default pipeline
//! bbpl run
//!
//! # Run the pipeline for a branch
//! bbpl run --branch main
//!
//! # Clear caches and artifacts
//! bbpl clean
//! ```

pub mod cli;
pub mod config;
pub mod document;
pub mod engine;
pub mod environment;
pub mod errors;
pub mod runtime;
pub mod stores;

// Re-export commonly used types
pub use config::RunnerConfig;
pub use document::{Document, DocumentLoader, DocumentValidator, Pipeline, Selection, Step};
pub use engine::{Engine, ExecutionResult, RunOptions, StepResult, StepStatus};
pub use errors::{BbplError, BbplResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

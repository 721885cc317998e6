// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Error types for the pipeline runner
//!
//! Every failure the engine can produce is a variant of [`BbplError`],
//! grouped by the subsystem that raises it. Container exits with a non-zero
//! code are *not* errors; they travel through step results.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for bbpl operations
pub type BbplResult<T> = Result<T, BbplError>;

/// Main error type for bbpl
#[derive(Error, Debug, Diagnostic)]
pub enum BbplError {
    // ─────────────────────────────────────────────────────────────────────────
    // Document Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(bbpl::pipelines_file_not_found),
        help("Create a bitbucket-pipelines.yml in your project root")
    )]
    PipelinesFileNotFound { path: PathBuf },

    #[error("Failed to parse pipeline file: {reason}")]
    #[diagnostic(code(bbpl::parse_error))]
    Parse {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(bbpl::validation_error))]
    Validation {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Pipeline configuration has {count} error(s)")]
    #[diagnostic(
        code(bbpl::validation_failed),
        help("Run 'bbpl validate' for the full diagnostic list")
    )]
    ValidationFailed { count: usize },

    // ─────────────────────────────────────────────────────────────────────────
    // Selection Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Custom pipeline '{name}' not found")]
    #[diagnostic(
        code(bbpl::custom_pipeline_not_found),
        help("Declare it under pipelines.custom")
    )]
    CustomPipelineNotFound { name: String },

    #[error("No pipeline found for branch '{branch}' and no default pipeline defined")]
    #[diagnostic(code(bbpl::branch_pipeline_not_found))]
    BranchPipelineNotFound { branch: String },

    #[error("Unknown pipeline '{name}'")]
    #[diagnostic(
        code(bbpl::unknown_pipeline),
        help("Only 'default' is accepted; use --custom or --branch for the rest")
    )]
    UnknownPipeline { name: String },

    #[error("No default pipeline defined")]
    #[diagnostic(
        code(bbpl::no_default_pipeline),
        help("Add a pipelines.default section or select a pipeline explicitly")
    )]
    NoDefaultPipeline,

    // ─────────────────────────────────────────────────────────────────────────
    // Runtime Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Docker error: {message}")]
    #[diagnostic(
        code(bbpl::docker_error),
        help("Check that the Docker daemon is running and the socket is reachable")
    )]
    Docker { message: String },

    #[error("Container error: {message}")]
    #[diagnostic(code(bbpl::container_error))]
    Container { message: String },

    #[error("Network error: {message}")]
    #[diagnostic(code(bbpl::network_error))]
    Network { message: String },

    #[error("Step '{step}' exceeded its time limit of {minutes} minute(s)")]
    #[diagnostic(code(bbpl::step_timeout))]
    StepTimeout { step: String, minutes: f64 },

    #[error("Pipeline exceeded the global time limit of {minutes} minute(s)")]
    #[diagnostic(code(bbpl::pipeline_timeout))]
    PipelineTimeout { minutes: f64 },

    #[error("Execution cancelled")]
    #[diagnostic(code(bbpl::cancelled))]
    Cancelled,

    // ─────────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Filesystem error at '{path}': {message}")]
    #[diagnostic(code(bbpl::filesystem_error))]
    Filesystem { path: PathBuf, message: String },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(bbpl::file_read_error))]
    FileRead { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Config/IO Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid runner configuration: {reason}")]
    #[diagnostic(code(bbpl::config_error))]
    Config { reason: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(bbpl::io_error))]
    Io { message: String },

    #[error("YAML error: {message}")]
    #[diagnostic(code(bbpl::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(bbpl::json_error))]
    Json { message: String },

    #[error("Glob pattern error: {message}")]
    #[diagnostic(code(bbpl::glob_error))]
    GlobPattern { message: String },
}

impl From<std::io::Error> for BbplError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for BbplError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for BbplError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<glob::PatternError> for BbplError {
    fn from(e: glob::PatternError) -> Self {
        Self::GlobPattern { message: e.to_string() }
    }
}

impl From<bollard::errors::Error> for BbplError {
    fn from(e: bollard::errors::Error) -> Self {
        Self::Docker { message: e.to_string() }
    }
}

impl BbplError {
    /// Wrap a filesystem failure with the path it happened at
    pub fn filesystem(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Parse failure without a hint
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
            help: None,
        }
    }

    /// Validation failure without a hint
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
            help: None,
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Execution engine
//!
//! Wires the loader, validator, selector, stores, environment assembler,
//! runtime driver, and scheduler into the lifecycle the CLI consumes:
//! setup, run, cleanup. Cleanup always runs, success or failure.

pub mod context;
pub mod result;
pub mod scheduler;

pub use context::PipelineContext;
pub use result::{ExecutionResult, GroupResult, ItemResult, StepResult, StepStatus};
pub use scheduler::Scheduler;

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::document::{
    select, Diagnostics, Document, DocumentLoader, DocumentValidator, Selection, PIPELINES_FILE,
};
use crate::environment::EnvironmentAssembler;
use crate::errors::{BbplError, BbplResult};
use crate::runtime::RuntimeDriver;
use crate::stores::{ArtifactStore, CacheStore, DEFAULT_MAX_AGE_DAYS};

/// Options for one engine run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub selection: Selection,
    pub dry_run: bool,
    /// Extra env file layered between `.env` and `.env.pipelines`
    pub env_file: Option<PathBuf>,
}

/// Which stores to clear
#[derive(Debug, Clone, Copy)]
pub struct ClearOptions {
    pub cache: bool,
    pub artifacts: bool,
}

impl Default for ClearOptions {
    fn default() -> Self {
        // clearing with no flags clears both
        Self {
            cache: true,
            artifacts: true,
        }
    }
}

/// The engine façade the CLI drives
pub struct Engine {
    workspace: PathBuf,
    config: RunnerConfig,
}

impl Engine {
    pub fn new(workspace: impl Into<PathBuf>, config: RunnerConfig) -> Self {
        Self {
            workspace: workspace.into(),
            config,
        }
    }

    /// Path of the pipeline document for this workspace
    pub fn document_path(&self) -> PathBuf {
        self.workspace.join(PIPELINES_FILE)
    }

    /// Load and normalize the workspace's pipeline document
    pub fn load_document(&self) -> BbplResult<Document> {
        DocumentLoader::load(&self.document_path())
    }

    /// Validate the document; `Ok((valid, diagnostics))` unless it cannot
    /// even be loaded
    pub fn validate(&self) -> BbplResult<(bool, Diagnostics)> {
        let document = self.load_document()?;
        let diagnostics = DocumentValidator::validate(&document);
        Ok((diagnostics.is_valid(), diagnostics))
    }

    /// Sorted labels of every selectable pipeline
    pub fn list_pipelines(&self) -> BbplResult<Vec<String>> {
        Ok(self.load_document()?.pipeline_labels())
    }

    /// Clear the cache and/or artifact stores
    pub fn clear_stores(&self, options: ClearOptions) -> BbplResult<()> {
        if options.cache {
            let cache =
                CacheStore::new(&self.config.cache.base_path, self.config.cache.enabled)?;
            cache.clear(None)?;
            info!("cache cleared");
        }
        if options.artifacts {
            let artifacts =
                ArtifactStore::new(&self.config.artifacts.base_path, self.config.artifacts.enabled)?;
            artifacts.clear()?;
            info!("artifacts cleared");
        }
        Ok(())
    }

    /// Run the selected pipeline end to end
    pub async fn run(&self, options: RunOptions) -> BbplResult<ExecutionResult> {
        let document = self.load_document()?;

        let diagnostics = DocumentValidator::validate(&document);
        for warning in &diagnostics.warnings {
            warn!("{warning}");
        }
        if !diagnostics.is_valid() {
            for error in &diagnostics.errors {
                warn!("validation error: {error}");
            }
            return Err(BbplError::ValidationFailed {
                count: diagnostics.errors.len(),
            });
        }

        let selected = select(&document, &options.selection)?;
        let pipeline = selected.pipeline.clone();
        let label = selected.label.clone();

        let context = PipelineContext::new(&self.workspace, options.selection.branch.as_deref());
        info!(
            "workspace '{}', build #{}, pipeline '{label}'",
            context.repo_slug, context.build_number
        );

        let cache = CacheStore::new(&self.config.cache.base_path, self.config.cache.enabled)?;
        if let Err(e) = cache.cleanup_old(chrono::Duration::days(DEFAULT_MAX_AGE_DAYS)) {
            warn!("cache cleanup skipped: {e}");
        }
        let artifacts =
            ArtifactStore::new(&self.config.artifacts.base_path, self.config.artifacts.enabled)?;
        let assembler = EnvironmentAssembler::new(
            &self.workspace,
            self.config.env.clone(),
            options.env_file.clone(),
        );

        let driver = Arc::new(RuntimeDriver::connect(
            &self.config.docker.socket,
            &self.config.docker.network_name,
        )?);

        if !options.dry_run {
            driver
                .create_network(&self.config.docker.network_name)
                .await?;
        }

        let cancel = CancellationToken::new();
        let sigint = {
            let token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, cancelling");
                    token.cancel();
                }
            })
        };

        let scheduler = Scheduler::new(
            Arc::clone(&driver),
            Arc::new(cache),
            Arc::new(artifacts),
            Arc::new(assembler),
            Arc::new(self.config.clone()),
            Arc::new(context),
            Arc::new(document),
            options.dry_run,
        );

        let result = scheduler.execute(&pipeline, &label, cancel.clone()).await;

        sigint.abort();
        driver.cleanup().await;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine_with_document(yaml: &str) -> (Engine, TempDir) {
        let workspace = TempDir::new().unwrap();
        std::fs::write(workspace.path().join(PIPELINES_FILE), yaml).unwrap();

        let mut config = RunnerConfig::default();
        config.cache.base_path = workspace.path().join(".stores/cache");
        config.artifacts.base_path = workspace.path().join(".stores/artifacts");

        (Engine::new(workspace.path(), config), workspace)
    }

    const SIMPLE: &str = r#"
pipelines:
  default:
    - step:
        name: greet
        script: ["echo hello"]
  custom:
    release:
      - step:
          script: ["echo release"]
"#;

    #[test]
    fn test_validate_reports_valid_document() {
        let (engine, _workspace) = engine_with_document(SIMPLE);
        let (valid, diagnostics) = engine.validate().unwrap();
        assert!(valid);
        assert!(diagnostics.errors.is_empty());
    }

    #[test]
    fn test_validate_missing_document_errors() {
        let workspace = TempDir::new().unwrap();
        let engine = Engine::new(workspace.path(), RunnerConfig::default());
        let err = engine.validate().unwrap_err();
        assert!(matches!(err, BbplError::PipelinesFileNotFound { .. }));
    }

    #[test]
    fn test_list_pipelines_sorted_labels() {
        let (engine, _workspace) = engine_with_document(SIMPLE);
        assert_eq!(
            engine.list_pipelines().unwrap(),
            vec!["custom/release", "default"]
        );
    }

    #[tokio::test]
    async fn test_dry_run_executes_without_a_runtime() {
        let (engine, _workspace) = engine_with_document(SIMPLE);
        let result = engine
            .run(RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.label, "default");
        assert_eq!(result.step_results().next().unwrap().name, "greet");
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_document() {
        let (engine, _workspace) = engine_with_document(
            r#"
pipelines:
  default:
    - step:
        name: empty
"#,
        );
        let err = engine
            .run(RunOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BbplError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_selects_custom_pipeline() {
        let (engine, _workspace) = engine_with_document(SIMPLE);
        let result = engine
            .run(RunOptions {
                selection: Selection {
                    custom: Some("release".into()),
                    ..Default::default()
                },
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.label, "custom/release");
    }

    #[test]
    fn test_clear_stores_is_idempotent() {
        let (engine, _workspace) = engine_with_document(SIMPLE);
        engine.clear_stores(ClearOptions::default()).unwrap();
        engine
            .clear_stores(ClearOptions {
                cache: true,
                artifacts: false,
            })
            .unwrap();
    }
}

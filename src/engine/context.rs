// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Pipeline execution context
//!
//! Identity and placeholder values for a local run. The hosted service
//! derives these from the repository and trigger; locally they are
//! synthesized once per run and held constant.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::environment::SystemContext;

/// Placeholder repository UUID for local runs
const LOCAL_REPO_UUID: &str = "{00000000-0000-0000-0000-000000000000}";

/// Branch reported when none is supplied
const LOCAL_BRANCH: &str = "local";

/// Commit hash reported for the working tree
const LOCAL_COMMIT: &str = "local-commit";

/// Per-run identity shared by every step
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub workspace_dir: PathBuf,
    pub workspace: String,
    pub repo_slug: String,
    pub repo_full_name: String,
    pub repo_uuid: String,
    pub build_number: u64,
    pub commit: String,
    pub branch: String,
    pub pipeline_uuid: String,
    pub triggerer_uuid: String,
}

impl PipelineContext {
    /// Build the context for `workspace_dir`, optionally pinning the branch
    pub fn new(workspace_dir: &Path, branch: Option<&str>) -> Self {
        let slug = workspace_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string());

        let build_number = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Self {
            workspace_dir: workspace_dir.to_path_buf(),
            workspace: slug.clone(),
            repo_full_name: format!("{slug}/{slug}"),
            repo_slug: slug,
            repo_uuid: LOCAL_REPO_UUID.to_string(),
            build_number,
            commit: LOCAL_COMMIT.to_string(),
            branch: branch.unwrap_or(LOCAL_BRANCH).to_string(),
            pipeline_uuid: braced_uuid(),
            triggerer_uuid: braced_uuid(),
        }
    }

    /// System-variable inputs for one step
    pub fn system_context(
        &self,
        parallel_count: Option<usize>,
        deployment: Option<String>,
    ) -> SystemContext {
        SystemContext {
            workspace: self.workspace.clone(),
            repo_slug: self.repo_slug.clone(),
            repo_uuid: self.repo_uuid.clone(),
            repo_full_name: self.repo_full_name.clone(),
            build_number: self.build_number,
            commit: self.commit.clone(),
            branch: self.branch.clone(),
            pipeline_uuid: self.pipeline_uuid.clone(),
            triggerer_uuid: self.triggerer_uuid.clone(),
            step_uuid: braced_uuid(),
            parallel_count,
            deployment,
        }
    }
}

/// UUIDs in the braced form the hosted service reports
fn braced_uuid() -> String {
    format!("{{{}}}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_defaults() {
        let context = PipelineContext::new(Path::new("/home/dev/widget"), None);
        assert_eq!(context.repo_slug, "widget");
        assert_eq!(context.repo_full_name, "widget/widget");
        assert_eq!(context.branch, "local");
        assert_eq!(context.commit, "local-commit");
        assert_eq!(context.repo_uuid, LOCAL_REPO_UUID);
        assert!(context.build_number > 0);
    }

    #[test]
    fn test_branch_override() {
        let context = PipelineContext::new(Path::new("/home/dev/widget"), Some("main"));
        assert_eq!(context.branch, "main");
    }

    #[test]
    fn test_pipeline_uuid_stable_but_step_uuid_fresh() {
        let context = PipelineContext::new(Path::new("/p"), None);
        let a = context.system_context(None, None);
        let b = context.system_context(None, None);
        assert_eq!(a.pipeline_uuid, b.pipeline_uuid);
        assert_eq!(a.triggerer_uuid, b.triggerer_uuid);
        assert_ne!(a.step_uuid, b.step_uuid);
        assert!(a.step_uuid.starts_with('{') && a.step_uuid.ends_with('}'));
    }
}

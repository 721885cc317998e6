// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Step environment assembly
//!
//! Builds the effective environment for one step from layered sources.
//! Later layers win, except that reserved system-variable names always
//! beat user input regardless of layer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

/// Where the working tree is mounted inside step containers
pub const CLONE_DIR: &str = "/opt/atlassian/pipelines/agent/build";

/// Monotonic id shared by every assembler in the process
static EXECUTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Per-step inputs for the reserved system variables
#[derive(Debug, Clone)]
pub struct SystemContext {
    pub workspace: String,
    pub repo_slug: String,
    pub repo_uuid: String,
    pub repo_full_name: String,
    pub build_number: u64,
    pub commit: String,
    pub branch: String,
    /// Stable for the whole run
    pub pipeline_uuid: String,
    /// Stable for the whole run
    pub triggerer_uuid: String,
    /// Stable for this step
    pub step_uuid: String,
    /// Present only inside a parallel group: total group size
    pub parallel_count: Option<usize>,
    pub deployment: Option<String>,
}

/// The assembled environment plus names that failed the validity check
#[derive(Debug, Clone)]
pub struct AssembledEnvironment {
    pub variables: BTreeMap<String, String>,
    /// Names outside `[A-Za-z_][A-Za-z0-9_]*`; surfaced, never filtered
    pub invalid_names: Vec<String>,
}

/// Builds step environments from layered sources
pub struct EnvironmentAssembler {
    process_env: BTreeMap<String, String>,
    cwd: PathBuf,
    user_env_file: Option<PathBuf>,
    config_defaults: BTreeMap<String, String>,
}

impl EnvironmentAssembler {
    /// Capture the process environment once and remember the layer sources
    pub fn new(
        cwd: &Path,
        config_defaults: BTreeMap<String, String>,
        user_env_file: Option<PathBuf>,
    ) -> Self {
        Self {
            process_env: std::env::vars().collect(),
            cwd: cwd.to_path_buf(),
            user_env_file,
            config_defaults,
        }
    }

    /// Replace the captured process environment (embedding and tests)
    pub fn with_process_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.process_env = env;
        self
    }

    /// Build the effective environment for one step
    pub fn assemble(
        &self,
        system: &SystemContext,
        step_variables: &BTreeMap<String, String>,
    ) -> AssembledEnvironment {
        let mut variables = self.process_env.clone();

        merge_env_file(&mut variables, &self.cwd.join(".env"));
        if let Some(path) = &self.user_env_file {
            merge_env_file(&mut variables, path);
        }
        merge_env_file(&mut variables, &self.cwd.join(".env.pipelines"));

        for (key, value) in &self.config_defaults {
            variables.insert(key.clone(), value.clone());
        }

        for (key, value) in step_variables {
            variables.insert(key.clone(), value.clone());
        }

        // reserved names win over every user-supplied layer
        for (key, value) in system_variables(system) {
            variables.insert(key, value);
        }

        let invalid_names = variables
            .keys()
            .filter(|name| !is_valid_name(name))
            .cloned()
            .collect();

        AssembledEnvironment {
            variables,
            invalid_names,
        }
    }
}

/// The reserved per-step system variables
fn system_variables(system: &SystemContext) -> Vec<(String, String)> {
    let mut vars = vec![
        ("BITBUCKET_WORKSPACE".into(), system.workspace.clone()),
        ("BITBUCKET_REPO_SLUG".into(), system.repo_slug.clone()),
        ("BITBUCKET_REPO_UUID".into(), system.repo_uuid.clone()),
        (
            "BITBUCKET_REPO_FULL_NAME".into(),
            system.repo_full_name.clone(),
        ),
        (
            "BITBUCKET_BUILD_NUMBER".into(),
            system.build_number.to_string(),
        ),
        ("BITBUCKET_COMMIT".into(), system.commit.clone()),
        ("BITBUCKET_BRANCH".into(), system.branch.clone()),
        ("BITBUCKET_PIPELINE_UUID".into(), system.pipeline_uuid.clone()),
        ("BITBUCKET_STEP_UUID".into(), system.step_uuid.clone()),
        (
            "BITBUCKET_STEP_TRIGGERER_UUID".into(),
            system.triggerer_uuid.clone(),
        ),
        ("BITBUCKET_TAG".into(), String::new()),
        ("BITBUCKET_BOOKMARK".into(), String::new()),
        ("BITBUCKET_PR_ID".into(), String::new()),
        ("BITBUCKET_PR_DESTINATION_BRANCH".into(), String::new()),
        (
            "BITBUCKET_DEPLOYMENT_ENVIRONMENT".into(),
            system.deployment.clone().unwrap_or_default(),
        ),
        ("BITBUCKET_CLONE_DIR".into(), CLONE_DIR.to_string()),
        ("BBPL_LOCAL_RUN".into(), "true".to_string()),
        (
            "BBPL_EXECUTION_ID".into(),
            EXECUTION_COUNTER.fetch_add(1, Ordering::Relaxed).to_string(),
        ),
        (
            "BBPL_EXECUTION_TIMESTAMP".into(),
            chrono::Utc::now().to_rfc3339(),
        ),
    ];

    if let Some(count) = system.parallel_count {
        vars.push(("BITBUCKET_PARALLEL_STEP".into(), "true".to_string()));
        vars.push((
            "BITBUCKET_PARALLEL_STEP_COUNT".into(),
            count.to_string(),
        ));
    }

    vars
}

/// Merge a dotenv-style file into `variables`; unreadable files are
/// logged and skipped, bad lines are skipped
fn merge_env_file(variables: &mut BTreeMap<String, String>, path: &Path) {
    if !path.exists() {
        return;
    }
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("skipping env file {}: {e}", path.display());
            return;
        }
    };
    for entry in entries {
        match entry {
            Ok((key, value)) => {
                variables.insert(key, value);
            }
            Err(e) => warn!("bad entry in {}: {e}", path.display()),
        }
    }
}

/// `^[A-Z_][A-Z0-9_]*$`, case-insensitively
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn system_fixture() -> SystemContext {
        SystemContext {
            workspace: "acme".into(),
            repo_slug: "widget".into(),
            repo_uuid: "{00000000-0000-0000-0000-000000000000}".into(),
            repo_full_name: "acme/widget".into(),
            build_number: 17,
            commit: "local-commit".into(),
            branch: "local".into(),
            pipeline_uuid: "pipeline-uuid".into(),
            triggerer_uuid: "triggerer-uuid".into(),
            step_uuid: "step-uuid".into(),
            parallel_count: None,
            deployment: None,
        }
    }

    fn assembler_in(dir: &Path) -> EnvironmentAssembler {
        EnvironmentAssembler::new(dir, BTreeMap::new(), None)
            .with_process_env(BTreeMap::new())
    }

    #[test]
    fn test_later_layers_win() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "SHARED=dotenv\nONLY_ENV=a\n").unwrap();
        std::fs::write(
            dir.path().join(".env.pipelines"),
            "SHARED=pipelines\n",
        )
        .unwrap();

        let assembler = assembler_in(dir.path()).with_process_env(
            [("SHARED".to_string(), "process".to_string())].into(),
        );
        let env = assembler.assemble(&system_fixture(), &BTreeMap::new());

        assert_eq!(env.variables["SHARED"], "pipelines");
        assert_eq!(env.variables["ONLY_ENV"], "a");
    }

    #[test]
    fn test_user_env_file_between_dotenv_and_pipelines() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".env"), "V=dotenv\n").unwrap();
        let mut user_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(user_file, "V=user").unwrap();

        let assembler = EnvironmentAssembler::new(
            dir.path(),
            BTreeMap::new(),
            Some(user_file.path().to_path_buf()),
        )
        .with_process_env(BTreeMap::new());
        let env = assembler.assemble(&system_fixture(), &BTreeMap::new());
        assert_eq!(env.variables["V"], "user");
    }

    #[test]
    fn test_step_variables_beat_config_defaults() {
        let dir = TempDir::new().unwrap();
        let assembler = EnvironmentAssembler::new(
            dir.path(),
            [("V".to_string(), "config".to_string())].into(),
            None,
        )
        .with_process_env(BTreeMap::new());

        let step_vars: BTreeMap<String, String> =
            [("V".to_string(), "step".to_string())].into();
        let env = assembler.assemble(&system_fixture(), &step_vars);
        assert_eq!(env.variables["V"], "step");
    }

    #[test]
    fn test_system_names_beat_step_variables() {
        let dir = TempDir::new().unwrap();
        let assembler = assembler_in(dir.path());

        let step_vars: BTreeMap<String, String> = [(
            "BITBUCKET_COMMIT".to_string(),
            "spoofed".to_string(),
        )]
        .into();
        let env = assembler.assemble(&system_fixture(), &step_vars);
        assert_eq!(env.variables["BITBUCKET_COMMIT"], "local-commit");
        assert_eq!(env.variables["BITBUCKET_BUILD_NUMBER"], "17");
        assert_eq!(env.variables["BITBUCKET_CLONE_DIR"], CLONE_DIR);
        assert_eq!(env.variables["BBPL_LOCAL_RUN"], "true");
    }

    #[test]
    fn test_parallel_markers_only_in_groups() {
        let dir = TempDir::new().unwrap();
        let assembler = assembler_in(dir.path());

        let solo = assembler.assemble(&system_fixture(), &BTreeMap::new());
        assert!(!solo.variables.contains_key("BITBUCKET_PARALLEL_STEP"));

        let mut system = system_fixture();
        system.parallel_count = Some(3);
        let grouped = assembler.assemble(&system, &BTreeMap::new());
        assert_eq!(grouped.variables["BITBUCKET_PARALLEL_STEP"], "true");
        assert_eq!(grouped.variables["BITBUCKET_PARALLEL_STEP_COUNT"], "3");
    }

    #[test]
    fn test_invalid_names_surfaced_not_filtered() {
        let dir = TempDir::new().unwrap();
        let assembler = assembler_in(dir.path());

        let step_vars: BTreeMap<String, String> = [
            ("9LIVES".to_string(), "cat".to_string()),
            ("GOOD_NAME".to_string(), "ok".to_string()),
        ]
        .into();
        let env = assembler.assemble(&system_fixture(), &step_vars);

        assert_eq!(env.invalid_names, vec!["9LIVES"]);
        // invalid names are still present in the environment
        assert_eq!(env.variables["9LIVES"], "cat");
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let dir = TempDir::new().unwrap();
        let assembler = assembler_in(dir.path());
        let a = assembler.assemble(&system_fixture(), &BTreeMap::new());
        let b = assembler.assemble(&system_fixture(), &BTreeMap::new());
        assert_ne!(
            a.variables["BBPL_EXECUTION_ID"],
            b.variables["BBPL_EXECUTION_ID"]
        );
    }

    #[test]
    fn test_name_validity() {
        assert!(is_valid_name("PATH"));
        assert!(is_valid_name("_private"));
        assert!(is_valid_name("lower_case"));
        assert!(!is_valid_name("1STARTS_WITH_DIGIT"));
        assert!(!is_valid_name("HAS-HYPHEN"));
        assert!(!is_valid_name(""));
    }
}

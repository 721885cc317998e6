// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Canonical pipeline model
//!
//! The shapes a bitbucket-pipelines.yml document normalizes into. The loader
//! owns key normalization and structural lifts; everything here assumes
//! camel-cased keys and lifted shapes, and is read-only after load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Step sizes the runner accepts
pub const SUPPORTED_SIZES: [&str; 5] = ["1x", "2x", "4x", "8x", "16x"];

/// Step triggers the runner accepts
pub const SUPPORTED_TRIGGERS: [&str; 2] = ["automatic", "manual"];

/// A parsed pipeline document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Default build image for every step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Global options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<GlobalOptions>,

    /// Clone behaviour
    #[serde(default)]
    pub clone: CloneConfig,

    /// Reusable definitions (caches, services, steps)
    #[serde(default)]
    pub definitions: Definitions,

    /// The pipelines group
    pub pipelines: Pipelines,
}

impl Document {
    /// Sorted labels of every selectable pipeline, for display
    pub fn pipeline_labels(&self) -> Vec<String> {
        let mut labels = Vec::new();
        if self.pipelines.default.is_some() {
            labels.push("default".to_string());
        }
        for name in self.pipelines.branches.keys() {
            labels.push(format!("branches/{name}"));
        }
        for name in self.pipelines.tags.keys() {
            labels.push(format!("tags/{name}"));
        }
        for name in self.pipelines.custom.keys() {
            labels.push(format!("custom/{name}"));
        }
        labels.sort();
        labels
    }
}

/// Global pipeline options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    /// Global time limit in minutes
    #[serde(rename = "maxTime", skip_serializing_if = "Option::is_none")]
    pub max_time: Option<f64>,

    /// Default step size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Whether steps get access to the Docker daemon
    pub docker: bool,
}

/// Clone behaviour for the working tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneConfig {
    /// Whether the working tree is mounted into step containers
    pub enabled: bool,

    /// Git LFS support flag (accepted, not acted on locally)
    pub lfs: bool,
}

impl Default for CloneConfig {
    fn default() -> Self {
        Self { enabled: true, lfs: false }
    }
}

/// Reusable definitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Definitions {
    /// Custom cache names mapped to paths
    pub caches: BTreeMap<String, String>,

    /// Named service containers
    pub services: BTreeMap<String, ServiceDefinition>,

    /// Reusable step bodies (referenced via YAML anchors)
    pub steps: Vec<Step>,
}

/// A service container definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDefinition {
    /// Service image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Service environment variables
    #[serde(deserialize_with = "de_scalar_map")]
    pub variables: BTreeMap<String, String>,

    /// Exposed ports
    pub ports: Vec<String>,

    /// Memory limit in megabytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

/// The five keyed pipeline collections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipelines {
    /// The default pipeline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Pipeline>,

    /// Branch-matched pipelines
    pub branches: BTreeMap<String, Pipeline>,

    /// Tag-matched pipelines
    pub tags: BTreeMap<String, Pipeline>,

    /// Pull-request pipelines (parsed, not selectable locally)
    pub pullrequests: BTreeMap<String, Pipeline>,

    /// Custom (manually triggered) pipelines
    pub custom: BTreeMap<String, Pipeline>,
}

/// An ordered sequence of pipeline items
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    pub items: Vec<PipelineItem>,
}

impl Pipeline {
    /// Total number of steps, counting parallel children
    pub fn step_count(&self) -> usize {
        self.items
            .iter()
            .map(|item| match item {
                PipelineItem::Step(_) => 1,
                PipelineItem::Parallel(group) => group.steps.len(),
            })
            .sum()
    }
}

/// A single unit of the pipeline walk: one step, or a parallel group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineItem {
    #[serde(rename = "step")]
    Step(Box<Step>),

    #[serde(rename = "parallel")]
    Parallel(ParallelGroup),
}

/// A group of steps executed concurrently
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelGroup {
    /// Cancel the group on the first failing step
    #[serde(rename = "failFast", default = "default_true")]
    pub fail_fast: bool,

    /// Member steps (unwrapped by the loader)
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// A container-backed unit of work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Step {
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Image override for this step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Shell command lines (never empty after validation)
    pub script: Vec<String>,

    /// Step size, one of [`SUPPORTED_SIZES`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Time limit in minutes
    #[serde(rename = "maxTime", skip_serializing_if = "Option::is_none")]
    pub max_time: Option<f64>,

    /// Cache names to restore before and save after the step
    pub caches: Vec<String>,

    /// Artifact collection spec
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Artifacts>,

    /// Service names (logged only; lifecycle is a future collaborator)
    pub services: Vec<String>,

    /// "automatic" or "manual"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,

    /// Changeset condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,

    /// Commands run after the main script, preserving its exit code
    #[serde(rename = "afterScript")]
    pub after_script: Vec<String>,

    /// Step-local environment variables
    #[serde(deserialize_with = "de_scalar_map")]
    pub variables: BTreeMap<String, String>,

    /// Deployment environment label (placeholder semantics locally)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
}

impl Step {
    /// Name used in logs and results
    pub fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("step-{}", index + 1))
    }
}

/// Artifact collection for a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifacts {
    /// Glob patterns relative to the workspace
    pub paths: Vec<String>,

    /// Whether prior artifacts are restored into this step
    #[serde(default = "default_true")]
    pub download: bool,
}

/// Changeset condition on a step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Condition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changesets: Option<Changesets>,
}

/// Path filters for a changeset condition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Changesets {
    #[serde(rename = "includePaths")]
    pub include_paths: Vec<String>,

    #[serde(rename = "excludePaths")]
    pub exclude_paths: Vec<String>,
}

/// A build image: bare reference or structured form
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Image {
    Name(String),
    Detailed(ImageSpec),
}

impl Image {
    /// Image reference, if present
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name.as_str()),
            Self::Detailed(spec) => spec.name.as_deref(),
        }
    }

    /// Registry credentials, if both parts are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match self {
            Self::Name(_) => None,
            Self::Detailed(spec) => match (spec.username.as_deref(), spec.password.as_deref()) {
                (Some(user), Some(pass)) => Some((user, pass)),
                _ => None,
            },
        }
    }

    /// User the container runs as, if overridden
    pub fn run_as_user(&self) -> Option<i64> {
        match self {
            Self::Name(_) => None,
            Self::Detailed(spec) => spec.run_as_user,
        }
    }
}

/// The structured image form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsCredentials>,

    #[serde(rename = "runAsUser", skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
}

/// AWS ECR credentials on an image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsCredentials {
    #[serde(rename = "access-key", alias = "accessKey", skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    #[serde(rename = "secret-key", alias = "secretKey", skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Deserialize a name→scalar mapping, stringifying numbers and booleans
fn de_scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;

    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            scalar_to_string(&value)
                .map(|s| (key.clone(), s))
                .ok_or_else(|| D::Error::custom(format!("variable '{key}' must be a scalar")))
        })
        .collect()
}

/// Render a YAML scalar as the string a shell environment would see
pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_name_forms() {
        let bare = Image::Name("node:20".into());
        assert_eq!(bare.name(), Some("node:20"));
        assert_eq!(bare.credentials(), None);

        let detailed = Image::Detailed(ImageSpec {
            name: Some("private/image".into()),
            username: Some("user".into()),
            password: Some("pass".into()),
            ..Default::default()
        });
        assert_eq!(detailed.name(), Some("private/image"));
        assert_eq!(detailed.credentials(), Some(("user", "pass")));
    }

    #[test]
    fn test_step_display_name_falls_back_to_index() {
        let step = Step::default();
        assert_eq!(step.display_name(2), "step-3");

        let named = Step {
            name: Some("Build".into()),
            ..Default::default()
        };
        assert_eq!(named.display_name(0), "Build");
    }

    #[test]
    fn test_pipeline_step_count_includes_parallel_children() {
        let pipeline = Pipeline {
            items: vec![
                PipelineItem::Step(Box::new(Step::default())),
                PipelineItem::Parallel(ParallelGroup {
                    fail_fast: true,
                    steps: vec![Step::default(), Step::default()],
                }),
            ],
        };
        assert_eq!(pipeline.step_count(), 3);
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(
            scalar_to_string(&serde_yaml::Value::Number(7.into())),
            Some("7".to_string())
        );
        assert_eq!(
            scalar_to_string(&serde_yaml::Value::Bool(true)),
            Some("true".to_string())
        );
        assert_eq!(
            scalar_to_string(&serde_yaml::Value::Sequence(vec![])),
            None
        );
    }

    #[test]
    fn test_pipeline_labels_sorted() {
        let yaml = r#"
pipelines:
  default:
    - step:
        script: ["true"]
  custom:
    release:
      - step:
          script: ["true"]
  branches:
    main:
      - step:
          script: ["true"]
"#;
        let doc: Document = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            doc.pipeline_labels(),
            vec!["branches/main", "custom/release", "default"]
        );
    }
}

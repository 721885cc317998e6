// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Runner configuration
//!
//! Layered, right-biased: built-in defaults, then the global config file,
//! then the project config file, then `BBPL_*` environment variables, then
//! caller-supplied overrides. Mappings merge recursively; everything else
//! replaces.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::{BbplError, BbplResult};

/// Directory under the user's home that holds global config, caches,
/// and artifacts
pub const RUNNER_DIR: &str = ".bitbucket-pipelines-local";

/// Project-local config file name
pub const PROJECT_CONFIG_FILE: &str = ".bitbucket-pipelines-local.yml";

/// Complete runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub docker: DockerConfig,
    pub resources: ResourceConfig,
    pub cache: CacheConfig,
    pub artifacts: ArtifactConfig,
    pub logging: LoggingConfig,

    /// Default environment variables injected into every step
    pub env: BTreeMap<String, String>,
}

/// Container runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Unix socket the Docker-compatible API listens on
    pub socket: String,

    /// Image used when the document declares none
    #[serde(rename = "defaultImage")]
    pub default_image: String,

    /// Shared network every step container joins
    #[serde(rename = "networkName")]
    pub network_name: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: "/var/run/docker.sock".to_string(),
            default_image: "atlassian/default-image:4".to_string(),
            network_name: "bbpl-network".to_string(),
        }
    }
}

/// Size-keyed resource limit tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// size → memory limit string (e.g. "4g")
    pub memory: BTreeMap<String, String>,

    /// size → CPU limit string (e.g. "2")
    pub cpus: BTreeMap<String, String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        let mut memory = BTreeMap::new();
        let mut cpus = BTreeMap::new();
        for (size, mem, cpu) in [
            ("1x", "4g", "1"),
            ("2x", "8g", "2"),
            ("4x", "16g", "4"),
            ("8x", "32g", "8"),
            ("16x", "64g", "16"),
        ] {
            memory.insert(size.to_string(), mem.to_string());
            cpus.insert(size.to_string(), cpu.to_string());
        }
        Self { memory, cpus }
    }
}

/// Cache store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding cache archives
    #[serde(rename = "basePath")]
    pub base_path: PathBuf,

    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_path: runner_home().join("cache"),
            enabled: true,
        }
    }
}

/// Artifact store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory holding per-step artifact copies
    #[serde(rename = "basePath")]
    pub base_path: PathBuf,

    pub enabled: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            base_path: runner_home().join("artifacts"),
            enabled: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            docker: DockerConfig::default(),
            resources: ResourceConfig::default(),
            cache: CacheConfig::default(),
            artifacts: ArtifactConfig::default(),
            logging: LoggingConfig::default(),
            env: BTreeMap::new(),
        }
    }
}

impl RunnerConfig {
    /// Load config for `cwd`, applying the full layering
    pub fn load(cwd: &Path, overrides: Option<Value>) -> BbplResult<Self> {
        let mut merged = serde_yaml::to_value(RunnerConfig::default())
            .map_err(|e| BbplError::Config { reason: e.to_string() })?;

        let global = runner_home().join("config.yml");
        if let Some(layer) = read_config_file(&global)? {
            merged = deep_merge(merged, layer);
        }

        let project = cwd.join(PROJECT_CONFIG_FILE);
        if let Some(layer) = read_config_file(&project)? {
            merged = deep_merge(merged, layer);
        }

        merged = deep_merge(merged, env_layer(std::env::vars()));

        if let Some(overrides) = overrides {
            merged = deep_merge(merged, overrides);
        }

        serde_yaml::from_value(merged).map_err(|e| BbplError::Config { reason: e.to_string() })
    }
}

/// Home-anchored runner directory, falling back to the cwd when the home
/// directory cannot be resolved
pub fn runner_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(RUNNER_DIR)
}

fn read_config_file(path: &Path) -> BbplResult<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|e| BbplError::FileRead {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    let value: Value = serde_yaml::from_str(&text).map_err(|e| BbplError::Config {
        reason: format!("{}: {e}", path.display()),
    })?;
    Ok(Some(value))
}

/// Translate `BBPL_*` environment variables into a config layer
fn env_layer(vars: impl Iterator<Item = (String, String)>) -> Value {
    let mut layer = Mapping::new();
    for (key, value) in vars {
        match key.as_str() {
            "BBPL_LOG_LEVEL" => {
                insert_nested(&mut layer, &["logging", "level"], Value::from(value));
            }
            "BBPL_DOCKER_IMAGE" => {
                insert_nested(&mut layer, &["docker", "defaultImage"], Value::from(value));
            }
            "BBPL_VERBOSE" => {
                let on = matches!(value.as_str(), "1" | "true" | "yes");
                insert_nested(&mut layer, &["logging", "verbose"], Value::from(on));
            }
            _ => {}
        }
    }
    Value::Mapping(layer)
}

fn insert_nested(map: &mut Mapping, path: &[&str], value: Value) {
    let (head, rest) = match path {
        [head, rest @ ..] => (*head, rest),
        [] => return,
    };
    if rest.is_empty() {
        map.insert(Value::from(head), value);
        return;
    }
    let entry = map
        .entry(Value::from(head))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if let Value::Mapping(inner) = entry {
        insert_nested(inner, rest, value);
    }
}

/// Right-biased merge: mappings merge recursively, everything else replaces
fn deep_merge(base: Value, layer: Value) -> Value {
    match (base, layer) {
        (Value::Mapping(mut base), Value::Mapping(layer)) => {
            for (key, layer_value) in layer {
                let merged = match base.remove(&key) {
                    Some(base_value) => deep_merge(base_value, layer_value),
                    None => layer_value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, layer) => layer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_sizes() {
        let config = RunnerConfig::default();
        for size in crate::document::SUPPORTED_SIZES {
            assert!(config.resources.memory.contains_key(size));
            assert!(config.resources.cpus.contains_key(size));
        }
    }

    #[test]
    fn test_deep_merge_keeps_sibling_keys() {
        let base = serde_yaml::to_value(RunnerConfig::default()).unwrap();
        let layer: Value = serde_yaml::from_str(
            r#"
docker:
  defaultImage: alpine:3
"#,
        )
        .unwrap();

        let merged: RunnerConfig = serde_yaml::from_value(deep_merge(base, layer)).unwrap();
        assert_eq!(merged.docker.default_image, "alpine:3");
        // siblings survive the merge
        assert_eq!(merged.docker.socket, "/var/run/docker.sock");
        assert_eq!(merged.docker.network_name, "bbpl-network");
    }

    #[test]
    fn test_deep_merge_replaces_non_mappings() {
        let base: Value = serde_yaml::from_str("env:\n  A: one\nlist: [1, 2]").unwrap();
        let layer: Value = serde_yaml::from_str("env:\n  B: two\nlist: [3]").unwrap();

        let merged = deep_merge(base, layer);
        assert_eq!(merged["env"]["A"], Value::from("one"));
        assert_eq!(merged["env"]["B"], Value::from("two"));
        // sequences replace wholesale
        assert_eq!(merged["list"], serde_yaml::from_str::<Value>("[3]").unwrap());
    }

    #[test]
    fn test_env_layer_translation() {
        let vars = vec![
            ("BBPL_LOG_LEVEL".to_string(), "debug".to_string()),
            ("BBPL_DOCKER_IMAGE".to_string(), "ubuntu:24.04".to_string()),
            ("BBPL_VERBOSE".to_string(), "true".to_string()),
            ("UNRELATED".to_string(), "ignored".to_string()),
        ];
        let layer = env_layer(vars.into_iter());

        assert_eq!(layer["logging"]["level"], Value::from("debug"));
        assert_eq!(layer["docker"]["defaultImage"], Value::from("ubuntu:24.04"));
        assert_eq!(layer["logging"]["verbose"], Value::from(true));
        assert!(layer.get("UNRELATED").is_none());
    }

    #[test]
    fn test_env_layer_overrides_defaults() {
        let base = serde_yaml::to_value(RunnerConfig::default()).unwrap();
        let vars = vec![("BBPL_LOG_LEVEL".to_string(), "trace".to_string())];
        let merged: RunnerConfig =
            serde_yaml::from_value(deep_merge(base, env_layer(vars.into_iter()))).unwrap();
        assert_eq!(merged.logging.level, "trace");
        assert!(!merged.logging.verbose);
    }
}

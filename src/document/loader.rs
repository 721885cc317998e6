// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Document loader
//!
//! Reads a bitbucket-pipelines.yml, normalizes key-name variants, applies
//! the structural lifts, and produces the canonical [`Document`]. The
//! canonical model never sees hyphenated keys or un-lifted shapes.

use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::document::model::Document;
use crate::errors::{BbplError, BbplResult};

/// Default document file name, resolved against the workspace
pub const PIPELINES_FILE: &str = "bitbucket-pipelines.yml";

/// Hyphenated keys merged into their camel-cased canonical form.
/// When both forms are present, camel wins.
const KEY_RENAMES: [(&str, &str); 7] = [
    ("max-time", "maxTime"),
    ("after-script", "afterScript"),
    ("run-as-user", "runAsUser"),
    ("pull-requests", "pullrequests"),
    ("fail-fast", "failFast"),
    ("include-paths", "includePaths"),
    ("exclude-paths", "excludePaths"),
];

/// Loads and normalizes pipeline documents
pub struct DocumentLoader;

impl DocumentLoader {
    /// Load the document at `path`
    pub fn load(path: &Path) -> BbplResult<Document> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BbplError::PipelinesFileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                BbplError::FileRead {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                }
            }
        })?;

        Self::from_str(&text)
    }

    /// Parse a document from YAML text
    pub fn from_str(text: &str) -> BbplResult<Document> {
        let value: Value = serde_yaml::from_str(text).map_err(|e| BbplError::Parse {
            reason: e.to_string(),
            help: None,
        })?;

        let normalized = Self::normalize(value)?;

        serde_yaml::from_value(normalized).map_err(|e| BbplError::Parse {
            reason: e.to_string(),
            help: Some("Check field types against the pipelines schema".into()),
        })
    }

    /// Normalize a raw document value into canonical shape.
    ///
    /// Idempotent: normalizing an already-canonical value is a no-op, which
    /// is what keeps the model stable across re-normalization.
    pub fn normalize(value: Value) -> BbplResult<Value> {
        let value = rename_keys(value);

        let Value::Mapping(mut doc) = value else {
            return Err(BbplError::Parse {
                reason: "pipeline document is empty or not a mapping".into(),
                help: None,
            });
        };
        if doc.is_empty() {
            return Err(BbplError::Parse {
                reason: "pipeline document is empty or not a mapping".into(),
                help: None,
            });
        }

        match doc.get("pipelines") {
            None | Some(Value::Null) => {
                return Err(BbplError::Validation {
                    reason: "document has no 'pipelines' section".into(),
                    help: Some("Add a pipelines: block with at least one pipeline".into()),
                });
            }
            Some(_) => {}
        }

        let pipelines = doc.remove("pipelines").unwrap_or(Value::Null);
        doc.insert(Value::from("pipelines"), normalize_pipelines(pipelines)?);

        if let Some(definitions) = doc.get_mut("definitions") {
            if let Some(steps) = definitions.get_mut("steps") {
                if let Value::Sequence(items) = steps {
                    let lifted: Vec<Value> = std::mem::take(items)
                        .into_iter()
                        .map(|item| lift_step(unwrap_step(item)))
                        .collect();
                    *steps = Value::Sequence(lifted);
                }
            }
        }

        Ok(Value::Mapping(doc))
    }
}

/// Recursively merge hyphenated key variants into camel case
fn rename_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, val) in map {
                out.insert(key, rename_keys(val));
            }
            for (hyphen, camel) in KEY_RENAMES {
                if let Some(val) = out.remove(hyphen) {
                    // camel wins when both forms are present
                    out.entry(Value::from(camel)).or_insert(val);
                }
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(rename_keys).collect()),
        other => other,
    }
}

/// Normalize the whole pipelines group
fn normalize_pipelines(value: Value) -> BbplResult<Value> {
    let Value::Mapping(group) = value else {
        return Err(BbplError::Validation {
            reason: "'pipelines' must be a mapping".into(),
            help: None,
        });
    };

    let mut out = Mapping::with_capacity(group.len());
    for (key, val) in group {
        let section = key.as_str().unwrap_or_default().to_string();
        let normalized = match section.as_str() {
            "default" => normalize_pipeline(val, "default")?,
            "branches" | "tags" | "pullrequests" | "custom" => {
                let Value::Mapping(named) = val else {
                    return Err(BbplError::Validation {
                        reason: format!("'pipelines.{section}' must be a mapping of pipelines"),
                        help: None,
                    });
                };
                let mut lifted = Mapping::with_capacity(named.len());
                for (name, pipeline) in named {
                    let label = format!(
                        "{section}/{}",
                        name.as_str().unwrap_or_default()
                    );
                    lifted.insert(name, normalize_pipeline(pipeline, &label)?);
                }
                Value::Mapping(lifted)
            }
            _ => val,
        };
        out.insert(key, normalized);
    }

    Ok(Value::Mapping(out))
}

/// Normalize one pipeline: a sequence of step / parallel items
fn normalize_pipeline(value: Value, label: &str) -> BbplResult<Value> {
    let Value::Sequence(items) = value else {
        return Err(BbplError::Validation {
            reason: format!("pipeline '{label}' must be a sequence of steps"),
            help: None,
        });
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(normalize_item(item, label)?);
    }
    Ok(Value::Sequence(out))
}

/// Normalize one pipeline item into `{step: ...}` or `{parallel: ...}`
fn normalize_item(item: Value, label: &str) -> BbplResult<Value> {
    let Value::Mapping(map) = item else {
        return Err(invalid_item(label));
    };

    if let Some(step) = map.get("step") {
        let mut out = Mapping::with_capacity(1);
        out.insert(Value::from("step"), lift_step(step.clone()));
        return Ok(Value::Mapping(out));
    }

    if let Some(parallel) = map.get("parallel") {
        let mut out = Mapping::with_capacity(1);
        out.insert(Value::from("parallel"), lift_parallel(parallel.clone()));
        return Ok(Value::Mapping(out));
    }

    Err(invalid_item(label))
}

fn invalid_item(label: &str) -> BbplError {
    BbplError::Validation {
        reason: format!("pipeline '{label}' contains an item that is neither a step nor a parallel group"),
        help: Some("Wrap each entry in 'step:' or 'parallel:'".into()),
    }
}

/// Lift a parallel body into `{failFast, steps}` with unwrapped steps
fn lift_parallel(value: Value) -> Value {
    let (fail_fast, steps) = match value {
        // bare list form: the whole body is the step list
        Value::Sequence(seq) => (None, seq),
        Value::Mapping(mut map) => {
            let fail_fast = map.remove("failFast");
            let steps = match map.remove("steps") {
                Some(Value::Sequence(seq)) => seq,
                _ => Vec::new(),
            };
            (fail_fast, steps)
        }
        _ => (None, Vec::new()),
    };

    let steps: Vec<Value> = steps
        .into_iter()
        .map(|item| lift_step(unwrap_step(item)))
        .collect();

    let mut out = Mapping::with_capacity(2);
    if let Some(fail_fast) = fail_fast {
        out.insert(Value::from("failFast"), fail_fast);
    }
    out.insert(Value::from("steps"), Value::Sequence(steps));
    Value::Mapping(out)
}

/// Unwrap a `{step: body}` wrapper, leaving bare bodies untouched
fn unwrap_step(item: Value) -> Value {
    if let Value::Mapping(mut map) = item {
        if map.len() == 1 {
            if let Some(step) = map.remove("step") {
                return step;
            }
        }
        return Value::Mapping(map);
    }
    item
}

/// Apply per-step structural lifts
fn lift_step(value: Value) -> Value {
    let Value::Mapping(mut map) = value else {
        return value;
    };

    // script written as a single string becomes a one-element sequence
    if let Some(script) = map.get("script") {
        if script.is_string() {
            let line = script.clone();
            map.insert(Value::from("script"), Value::Sequence(vec![line]));
        }
    }

    // bare artifact list becomes {paths: list}; download defaults to true
    if let Some(artifacts) = map.get("artifacts") {
        if artifacts.is_sequence() {
            let paths = artifacts.clone();
            let mut lifted = Mapping::with_capacity(1);
            lifted.insert(Value::from("paths"), paths);
            map.insert(Value::from("artifacts"), Value::Mapping(lifted));
        }
    }

    Value::Mapping(map)
}

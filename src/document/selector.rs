// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Pipeline selection
//!
//! Resolves a CLI intent to exactly one pipeline. First match wins:
//! custom name, branch name, explicit pipeline id, then the default.

use crate::document::model::{Document, Pipeline};
use crate::errors::{BbplError, BbplResult};

/// What the caller asked to run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Name under pipelines.custom
    pub custom: Option<String>,

    /// Branch to match under pipelines.branches
    pub branch: Option<String>,

    /// Explicit pipeline id; only "default" is accepted
    pub pipeline: Option<String>,
}

/// The resolved pipeline plus the label it was found under
#[derive(Debug, Clone)]
pub struct Selected<'a> {
    pub pipeline: &'a Pipeline,
    pub label: String,
}

/// Resolve `selection` against `document`
pub fn select<'a>(document: &'a Document, selection: &Selection) -> BbplResult<Selected<'a>> {
    if let Some(name) = &selection.custom {
        let pipeline = document
            .pipelines
            .custom
            .get(name)
            .ok_or_else(|| BbplError::CustomPipelineNotFound { name: name.clone() })?;
        return Ok(Selected {
            pipeline,
            label: format!("custom/{name}"),
        });
    }

    if let Some(branch) = &selection.branch {
        if let Some(pipeline) = document.pipelines.branches.get(branch) {
            return Ok(Selected {
                pipeline,
                label: format!("branches/{branch}"),
            });
        }
        // no branch match: fall back to the default pipeline
        return document
            .pipelines
            .default
            .as_ref()
            .map(|pipeline| Selected {
                pipeline,
                label: "default".to_string(),
            })
            .ok_or_else(|| BbplError::BranchPipelineNotFound {
                branch: branch.clone(),
            });
    }

    if let Some(name) = &selection.pipeline {
        if name != "default" {
            return Err(BbplError::UnknownPipeline { name: name.clone() });
        }
    }

    document
        .pipelines
        .default
        .as_ref()
        .map(|pipeline| Selected {
            pipeline,
            label: "default".to_string(),
        })
        .ok_or(BbplError::NoDefaultPipeline)
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Pipeline document handling
//!
//! Loading, normalization, validation, and selection of the canonical
//! pipeline model.

pub mod loader;
pub mod model;
pub mod selector;
pub mod validator;

pub use loader::{DocumentLoader, PIPELINES_FILE};
pub use model::{
    Artifacts, Changesets, CloneConfig, Condition, Definitions, Document, GlobalOptions, Image,
    ImageSpec, ParallelGroup, Pipeline, PipelineItem, Pipelines, ServiceDefinition, Step,
    SUPPORTED_SIZES, SUPPORTED_TRIGGERS,
};
pub use selector::{select, Selected, Selection};
pub use validator::{Diagnostics, DocumentValidator};

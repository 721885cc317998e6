// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Document validation
//!
//! Checks the canonical model before execution. Errors block the run;
//! warnings are reported and execution proceeds.

use crate::document::model::{
    Document, Image, Pipeline, Step, SUPPORTED_SIZES, SUPPORTED_TRIGGERS,
};

/// Script length above which a warning is emitted
const SCRIPT_WARN_LINES: usize = 100;

/// Step time limit (minutes) above which a warning is emitted
const MAX_TIME_WARN_MINUTES: f64 = 120.0;

/// Parallel group size above which a warning is emitted
const PARALLEL_WARN_STEPS: usize = 10;

/// Step name length above which a warning is emitted
const STEP_NAME_WARN_CHARS: usize = 50;

/// Validates canonical pipeline documents
pub struct DocumentValidator;

/// Result of validating a document
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl DocumentValidator {
    /// Validate a document, collecting every error and warning
    pub fn validate(document: &Document) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();

        if let Some(image) = &document.image {
            Self::validate_image(image, "document image", &mut diagnostics);
        }

        if let Some(pipeline) = &document.pipelines.default {
            Self::validate_pipeline(pipeline, "default", &mut diagnostics);
        }
        for (name, pipeline) in &document.pipelines.branches {
            Self::validate_pipeline(pipeline, &format!("branches/{name}"), &mut diagnostics);
        }
        for (name, pipeline) in &document.pipelines.tags {
            Self::validate_pipeline(pipeline, &format!("tags/{name}"), &mut diagnostics);
        }
        for (name, pipeline) in &document.pipelines.pullrequests {
            Self::validate_pipeline(pipeline, &format!("pullrequests/{name}"), &mut diagnostics);
        }
        for (name, pipeline) in &document.pipelines.custom {
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                || name.is_empty()
            {
                diagnostics.add_warning(format!(
                    "custom pipeline name '{name}' contains characters outside [A-Za-z0-9_-]"
                ));
            }
            Self::validate_pipeline(pipeline, &format!("custom/{name}"), &mut diagnostics);
        }

        let no_pipelines = document.pipelines.default.is_none()
            && document.pipelines.branches.is_empty()
            && document.pipelines.tags.is_empty()
            && document.pipelines.pullrequests.is_empty()
            && document.pipelines.custom.is_empty();
        if no_pipelines {
            diagnostics.add_error("'pipelines' defines no pipeline");
        }

        for (name, service) in &document.definitions.services {
            match &service.image {
                None => diagnostics.add_error(format!("service '{name}' has no image")),
                Some(image) => {
                    Self::validate_image(image, &format!("service '{name}' image"), &mut diagnostics)
                }
            }
        }

        diagnostics
    }

    fn validate_pipeline(pipeline: &Pipeline, label: &str, diagnostics: &mut Diagnostics) {
        if pipeline.items.is_empty() {
            diagnostics.add_warning(format!("pipeline '{label}' is empty; nothing will run"));
            return;
        }

        for (index, item) in pipeline.items.iter().enumerate() {
            match item {
                crate::document::model::PipelineItem::Step(step) => {
                    Self::validate_step(step, label, index, diagnostics);
                }
                crate::document::model::PipelineItem::Parallel(group) => {
                    if group.steps.is_empty() {
                        diagnostics.add_error(format!(
                            "pipeline '{label}' item {} is a parallel group with no steps",
                            index + 1
                        ));
                    } else if group.steps.len() == 1 {
                        diagnostics.add_warning(format!(
                            "pipeline '{label}' item {} is a parallel group with a single step",
                            index + 1
                        ));
                    } else if group.steps.len() > PARALLEL_WARN_STEPS {
                        diagnostics.add_warning(format!(
                            "pipeline '{label}' item {} runs {} steps in parallel; consider splitting",
                            index + 1,
                            group.steps.len()
                        ));
                    }
                    for step in &group.steps {
                        Self::validate_step(step, label, index, diagnostics);
                    }
                }
            }
        }
    }

    fn validate_step(step: &Step, label: &str, index: usize, diagnostics: &mut Diagnostics) {
        let name = step.display_name(index);
        let loc = format!("pipeline '{label}', step '{name}'");

        if step.script.is_empty() {
            diagnostics.add_error(format!("{loc}: script is missing or empty"));
        } else if step.script.len() > SCRIPT_WARN_LINES {
            diagnostics.add_warning(format!(
                "{loc}: script has {} lines; consider moving logic into a script file",
                step.script.len()
            ));
        }

        if let Some(size) = &step.size {
            if !SUPPORTED_SIZES.contains(&size.as_str()) {
                diagnostics.add_error(format!(
                    "{loc}: size '{size}' is not one of {}",
                    SUPPORTED_SIZES.join(", ")
                ));
            }
        }

        if let Some(max_time) = step.max_time {
            if max_time <= 0.0 || !max_time.is_finite() {
                diagnostics.add_error(format!("{loc}: maxTime must be a positive number"));
            } else if max_time > MAX_TIME_WARN_MINUTES {
                diagnostics.add_warning(format!(
                    "{loc}: maxTime of {max_time} minutes is unusually long"
                ));
            }
        }

        if let Some(trigger) = &step.trigger {
            if !SUPPORTED_TRIGGERS.contains(&trigger.as_str()) {
                diagnostics.add_error(format!(
                    "{loc}: trigger '{trigger}' must be 'automatic' or 'manual'"
                ));
            }
        }

        if let Some(artifacts) = &step.artifacts {
            if artifacts.paths.is_empty() {
                diagnostics.add_error(format!("{loc}: artifacts.paths is empty"));
            } else if artifacts.paths.iter().any(String::is_empty) {
                diagnostics.add_error(format!("{loc}: artifacts.paths contains an empty pattern"));
            }
        }

        if let Some(image) = &step.image {
            Self::validate_image(image, &loc, diagnostics);
        }

        if let Some(step_name) = &step.name {
            if step_name.chars().count() > STEP_NAME_WARN_CHARS {
                diagnostics.add_warning(format!(
                    "{loc}: step name is longer than {STEP_NAME_WARN_CHARS} characters"
                ));
            }
        }
    }

    fn validate_image(image: &Image, loc: &str, diagnostics: &mut Diagnostics) {
        match image {
            Image::Name(name) => {
                if name.is_empty() {
                    diagnostics.add_error(format!("{loc}: image reference is empty"));
                }
            }
            Image::Detailed(spec) => {
                match spec.name.as_deref() {
                    None | Some("") => {
                        diagnostics.add_error(format!("{loc}: image object has no 'name'"))
                    }
                    Some(_) => {}
                }
                if spec.username.is_some() && spec.password.is_none() {
                    diagnostics.add_warning(format!(
                        "{loc}: image has a username but no password"
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::loader::DocumentLoader;

    fn load(yaml: &str) -> Document {
        DocumentLoader::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_document_has_no_diagnostics() {
        let doc = load(
            r#"
image: node:20
pipelines:
  default:
    - step:
        name: build
        script: ["npm ci", "npm test"]
        size: 2x
        maxTime: 30
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(diagnostics.is_valid());
        assert!(!diagnostics.has_warnings());
    }

    #[test]
    fn test_empty_script_is_error() {
        let doc = load(
            r#"
pipelines:
  default:
    - step:
        name: broken
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(!diagnostics.is_valid());
        assert!(diagnostics.errors[0].contains("script"));
    }

    #[test]
    fn test_unsupported_size_is_error() {
        let doc = load(
            r#"
pipelines:
  default:
    - step:
        script: ["true"]
        size: 3x
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(!diagnostics.is_valid());
        assert!(diagnostics.errors[0].contains("size"));
    }

    #[test]
    fn test_zero_max_time_is_error() {
        let doc = load(
            r#"
pipelines:
  default:
    - step:
        script: ["true"]
        maxTime: 0
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(!diagnostics.is_valid());
        assert!(diagnostics.errors[0].contains("maxTime"));
    }

    #[test]
    fn test_long_max_time_is_warning() {
        let doc = load(
            r#"
pipelines:
  default:
    - step:
        script: ["true"]
        maxTime: 240
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(diagnostics.is_valid());
        assert!(diagnostics.warnings[0].contains("maxTime"));
    }

    #[test]
    fn test_invalid_trigger_is_error() {
        let doc = load(
            r#"
pipelines:
  default:
    - step:
        script: ["true"]
        trigger: sometimes
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(!diagnostics.is_valid());
    }

    #[test]
    fn test_empty_pipeline_is_warning_only() {
        let doc = load(
            r#"
pipelines:
  default: []
  branches:
    main:
      - step:
          script: ["true"]
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(diagnostics.is_valid());
        assert!(diagnostics.warnings[0].contains("empty"));
    }

    #[test]
    fn test_single_step_parallel_is_warning() {
        let doc = load(
            r#"
pipelines:
  default:
    - parallel:
        steps:
          - step:
              script: ["true"]
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(diagnostics.is_valid());
        assert!(diagnostics.warnings[0].contains("single step"));
    }

    #[test]
    fn test_username_without_password_is_warning() {
        let doc = load(
            r#"
image:
  name: private/image
  username: builder
pipelines:
  default:
    - step:
        script: ["true"]
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(diagnostics.is_valid());
        assert!(diagnostics.warnings[0].contains("password"));
    }

    #[test]
    fn test_image_object_without_name_is_error() {
        let doc = load(
            r#"
image:
  username: someone
pipelines:
  default:
    - step:
        script: ["true"]
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(!diagnostics.is_valid());
    }

    #[test]
    fn test_service_without_image_is_error() {
        let doc = load(
            r#"
definitions:
  services:
    db: {}
pipelines:
  default:
    - step:
        script: ["true"]
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(!diagnostics.is_valid());
        assert!(diagnostics.errors[0].contains("service"));
    }

    #[test]
    fn test_weird_custom_name_is_warning() {
        let doc = load(
            r#"
pipelines:
  custom:
    "deploy to prod!":
      - step:
          script: ["true"]
"#,
        );
        let diagnostics = DocumentValidator::validate(&doc);
        assert!(diagnostics.is_valid());
        assert!(diagnostics.warnings[0].contains("custom pipeline name"));
    }
}

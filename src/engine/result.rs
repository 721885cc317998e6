// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Run results
//!
//! The result tree mirrors the pipeline structure: one entry per executed
//! item, built up as execution progresses. Items after a failure never
//! appear.

use std::time::Duration;

/// Step lifecycle; terminal states are absorbing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{label}")
    }
}

/// Outcome of one step
#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
    pub exit_code: i64,
    pub output: Vec<String>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl StepResult {
    pub fn succeeded(name: impl Into<String>, output: Vec<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Succeeded,
            exit_code: 0,
            output,
            error: None,
            duration,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        exit_code: i64,
        output: Vec<String>,
        error: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Failed,
            exit_code,
            output,
            error,
            duration,
        }
    }

    /// The synthetic result a cancelled step reports
    pub fn cancelled(name: impl Into<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Cancelled,
            exit_code: 1,
            output: Vec::new(),
            error: Some("execution cancelled".to_string()),
            duration,
        }
    }

    /// Dry runs record the script without executing it
    pub fn dry_run(name: impl Into<String>, script: &[String]) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Succeeded,
            exit_code: 0,
            output: script.iter().map(|line| format!("+ {line}")).collect(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Succeeded
    }

    /// First line of the error, for the failure summary
    pub fn error_summary(&self) -> Option<&str> {
        self.error.as_deref().and_then(|e| e.lines().next())
    }
}

/// Outcome of a parallel group
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub steps: Vec<StepResult>,
    pub fail_fast: bool,
}

impl GroupResult {
    /// A group succeeds iff every member step succeeded
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(StepResult::is_success)
    }
}

/// One executed pipeline item
#[derive(Debug, Clone)]
pub enum ItemResult {
    Step(StepResult),
    Parallel(GroupResult),
}

impl ItemResult {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Step(step) => step.is_success(),
            Self::Parallel(group) => group.is_success(),
        }
    }
}

/// Aggregated result for a whole pipeline run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Label the pipeline was selected under
    pub label: String,
    pub items: Vec<ItemResult>,
    pub success: bool,
    pub duration: Duration,
    /// Abnormal termination summary (timeout, cancellation)
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Every step result, in emission order
    pub fn step_results(&self) -> impl Iterator<Item = &StepResult> {
        self.items.iter().flat_map(|item| match item {
            ItemResult::Step(step) => std::slice::from_ref(step).iter(),
            ItemResult::Parallel(group) => group.steps.iter(),
        })
    }

    /// The first failing step, if any
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.step_results()
            .find(|step| step.status == StepStatus::Failed)
    }
}

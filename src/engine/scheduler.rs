// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Pipeline scheduler
//!
//! Walks a selected pipeline in order: sequential steps one after another,
//! parallel groups fanned out on the runtime. The first failing item stops
//! the walk. Cancellation (fail-fast trip, SIGINT, global timeout) threads
//! through a token that every in-flight step observes at its next await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RunnerConfig;
use crate::document::{Document, Image, ParallelGroup, Pipeline, PipelineItem, Step};
use crate::engine::context::PipelineContext;
use crate::engine::result::{ExecutionResult, GroupResult, ItemResult, StepResult};
use crate::environment::EnvironmentAssembler;
use crate::errors::BbplError;
use crate::runtime::{parse_cpus, parse_memory, ContainerSpec, RuntimeDriver};
use crate::stores::{ArtifactStore, CacheStore};

/// Pause between pipeline items
const ITEM_SPACING: Duration = Duration::from_millis(100);

/// Walks pipelines and drives their steps
#[derive(Clone)]
pub struct Scheduler {
    driver: Arc<RuntimeDriver>,
    cache: Arc<CacheStore>,
    artifacts: Arc<ArtifactStore>,
    assembler: Arc<EnvironmentAssembler>,
    config: Arc<RunnerConfig>,
    context: Arc<PipelineContext>,
    document: Arc<Document>,
    dry_run: bool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Arc<RuntimeDriver>,
        cache: Arc<CacheStore>,
        artifacts: Arc<ArtifactStore>,
        assembler: Arc<EnvironmentAssembler>,
        config: Arc<RunnerConfig>,
        context: Arc<PipelineContext>,
        document: Arc<Document>,
        dry_run: bool,
    ) -> Self {
        Self {
            driver,
            cache,
            artifacts,
            assembler,
            config,
            context,
            document,
            dry_run,
        }
    }

    /// Execute `pipeline`, aggregating per-item results. Items after the
    /// first failure are not started; cancellation and the global timeout
    /// end the walk early.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        label: &str,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        info!(
            "running pipeline '{label}' ({} item(s), {} step(s))",
            pipeline.items.len(),
            pipeline.step_count()
        );

        let global_minutes = self
            .document
            .options
            .as_ref()
            .and_then(|options| options.max_time);
        let timed_out = Arc::new(AtomicBool::new(false));
        let watchdog = global_minutes.map(|minutes| {
            let token = cancel.clone();
            let flag = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(minutes * 60.0)).await;
                flag.store(true, Ordering::SeqCst);
                token.cancel();
            })
        });

        let mut items = Vec::new();
        let mut success = true;

        for (index, item) in pipeline.items.iter().enumerate() {
            if cancel.is_cancelled() {
                success = false;
                break;
            }
            if index > 0 {
                tokio::time::sleep(ITEM_SPACING).await;
            }

            match item {
                PipelineItem::Step(step) => {
                    let result = self
                        .run_step((**step).clone(), index, None, cancel.clone())
                        .await;
                    let ok = result.is_success();
                    items.push(ItemResult::Step(result));
                    if !ok {
                        success = false;
                        break;
                    }
                }
                PipelineItem::Parallel(group) => {
                    let result = self.run_group(group, cancel.clone()).await;
                    let ok = result.is_success();
                    items.push(ItemResult::Parallel(result));
                    if !ok {
                        success = false;
                        break;
                    }
                }
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        let error = if timed_out.load(Ordering::SeqCst) {
            Some(
                BbplError::PipelineTimeout {
                    minutes: global_minutes.unwrap_or_default(),
                }
                .to_string(),
            )
        } else if cancel.is_cancelled() {
            Some("execution cancelled".to_string())
        } else {
            None
        };

        ExecutionResult {
            label: label.to_string(),
            items,
            success: success && error.is_none(),
            duration: started.elapsed(),
            error,
        }
    }

    /// Run every step of a parallel group concurrently. With fail-fast the
    /// first failure cancels the siblings; finished children keep their
    /// results and cancelled ones report synthetic failures.
    async fn run_group(&self, group: &ParallelGroup, cancel: CancellationToken) -> GroupResult {
        let count = group.steps.len();
        info!(
            "parallel group: {count} step(s), fail-fast {}",
            if group.fail_fast { "on" } else { "off" }
        );

        let child = cancel.child_token();
        let mut tasks: JoinSet<(usize, StepResult)> = JoinSet::new();
        for (i, step) in group.steps.iter().enumerate() {
            let scheduler = self.clone();
            let step = step.clone();
            let token = child.clone();
            tasks.spawn(async move { (i, scheduler.run_step(step, i, Some(count), token).await) });
        }

        let mut slots: Vec<Option<StepResult>> = (0..count).map(|_| None).collect();
        let mut tripped = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, result)) => {
                    if group.fail_fast && !result.is_success() && !tripped {
                        tripped = true;
                        child.cancel();
                    }
                    slots[i] = Some(result);
                }
                Err(e) => warn!("parallel step task did not complete: {e}"),
            }
        }

        let steps = slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.unwrap_or_else(|| {
                    StepResult::failed(
                        group.steps[i].display_name(i),
                        1,
                        Vec::new(),
                        Some("execution failed".to_string()),
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        GroupResult {
            steps,
            fail_fast: group.fail_fast,
        }
    }

    /// Run a single step through its whole lifecycle: restore caches and
    /// artifacts, run the container, then persist caches and artifacts.
    async fn run_step(
        &self,
        step: Step,
        index: usize,
        parallel_count: Option<usize>,
        cancel: CancellationToken,
    ) -> StepResult {
        let name = step.display_name(index);
        let started = Instant::now();

        if self.dry_run {
            info!("step '{name}': dry run");
            return StepResult::dry_run(name, &step.script);
        }
        if cancel.is_cancelled() {
            return StepResult::cancelled(name, started.elapsed());
        }

        info!("step '{name}': running");

        for cache_name in &step.caches {
            let target = CacheStore::resolve_path(cache_name, &self.context.workspace_dir);
            let hit = self.cache.restore(cache_name, &target);
            info!(
                "step '{name}': cache '{cache_name}' {}",
                if hit { "restored" } else { "miss" }
            );
        }

        let download = step
            .artifacts
            .as_ref()
            .map(|artifacts| artifacts.download)
            .unwrap_or(true);
        if download {
            self.artifacts.restore(&self.context.workspace_dir, None);
        }

        if !step.services.is_empty() {
            info!(
                "step '{name}': declared services [{}] are not started locally",
                step.services.join(", ")
            );
        }
        if step.condition.is_some() {
            info!("step '{name}': changeset condition ignored locally; step runs");
        }

        let system = self
            .context
            .system_context(parallel_count, step.deployment.clone());
        let environment = self.assembler.assemble(&system, &step.variables);
        for invalid in &environment.invalid_names {
            warn!("step '{name}': environment variable name '{invalid}' is not portable");
        }

        let image = step.image.as_ref().or(self.document.image.as_ref());
        let reference = image
            .and_then(Image::name)
            .unwrap_or(self.config.docker.default_image.as_str())
            .to_string();
        let credentials = image
            .and_then(Image::credentials)
            .map(|(user, pass)| (user.to_string(), pass.to_string()));

        if let Err(e) = self.driver.pull_image(&reference, credentials).await {
            return StepResult::failed(
                name,
                1,
                Vec::new(),
                Some(e.to_string()),
                started.elapsed(),
            );
        }

        let spec = self.step_spec(&step, image, &reference, &environment.variables);
        let handle = match self.driver.create_container(&spec).await {
            Ok(handle) => handle,
            Err(e) => {
                return StepResult::failed(
                    name,
                    1,
                    Vec::new(),
                    Some(e.to_string()),
                    started.elapsed(),
                )
            }
        };

        let outcome = tokio::select! {
            run = self.driver.run_container(&handle) => RunOutcome::Finished(run),
            _ = cancel.cancelled() => RunOutcome::Cancelled,
            _ = step_deadline(step.max_time) => RunOutcome::TimedOut,
        };

        match outcome {
            RunOutcome::Finished(run) => {
                if let Err(e) = self.driver.remove_container(&handle.id).await {
                    warn!("step '{name}': container removal failed: {e}");
                }
                if run.exit_code == 0 && run.error.is_none() {
                    self.persist_step_outputs(&step, &name);
                    info!("step '{name}': succeeded in {:.1}s", run.duration.as_secs_f64());
                    StepResult::succeeded(name, run.output, run.duration)
                } else {
                    info!("step '{name}': failed with exit code {}", run.exit_code);
                    StepResult::failed(name, run.exit_code, run.output, run.error, run.duration)
                }
            }
            RunOutcome::Cancelled => {
                if let Err(e) = self.driver.stop_container(&handle.id).await {
                    warn!("step '{name}': stop after cancellation failed: {e}");
                }
                info!("step '{name}': cancelled");
                StepResult::cancelled(name, started.elapsed())
            }
            RunOutcome::TimedOut => {
                if let Err(e) = self.driver.stop_container(&handle.id).await {
                    warn!("step '{name}': stop after timeout failed: {e}");
                }
                let minutes = step.max_time.unwrap_or_default();
                let message = BbplError::StepTimeout {
                    step: name.clone(),
                    minutes,
                }
                .to_string();
                warn!("{message}");
                StepResult::failed(name, 1, Vec::new(), Some(message), started.elapsed())
            }
        }
    }

    /// Save the step's declared caches and artifacts after a success.
    /// Failures here never fail the step; they are logged.
    fn persist_step_outputs(&self, step: &Step, name: &str) {
        for cache_name in &step.caches {
            let source = CacheStore::resolve_path(cache_name, &self.context.workspace_dir);
            if let Err(e) = self.cache.save(cache_name, &source) {
                warn!("step '{name}': cache '{cache_name}' save failed: {e}");
            }
        }

        if let Some(artifacts) = &step.artifacts {
            match self
                .artifacts
                .save(&artifacts.paths, &self.context.workspace_dir, name)
            {
                Ok(count) => info!("step '{name}': stored {count} artifact file(s)"),
                Err(e) => warn!("step '{name}': artifact save failed: {e}"),
            }
        }
    }

    /// Assemble the container spec for one step
    fn step_spec(
        &self,
        step: &Step,
        image: Option<&Image>,
        reference: &str,
        variables: &std::collections::BTreeMap<String, String>,
    ) -> ContainerSpec {
        let workspace = self.context.workspace_dir.to_string_lossy();
        let mut spec = ContainerSpec::for_step(
            reference,
            &workspace,
            &step.script,
            &step.after_script,
        );
        if !self.document.clone.enabled {
            spec.binds.clear();
        }

        spec.env = variables
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        spec.network = Some(self.config.docker.network_name.clone());
        spec.user = image.and_then(Image::run_as_user).map(|user| user.to_string());

        let size = step
            .size
            .clone()
            .or_else(|| {
                self.document
                    .options
                    .as_ref()
                    .and_then(|options| options.size.clone())
            })
            .unwrap_or_else(|| "1x".to_string());
        spec.memory_bytes = self
            .config
            .resources
            .memory
            .get(&size)
            .and_then(|limit| parse_memory(limit));
        spec.nano_cpus = self
            .config
            .resources
            .cpus
            .get(&size)
            .and_then(|limit| parse_cpus(limit));

        let docker_enabled = self
            .document
            .options
            .as_ref()
            .map(|options| options.docker)
            .unwrap_or(false)
            || step.services.iter().any(|service| service == "docker");
        if docker_enabled {
            spec.binds
                .push(format!("{0}:{0}", self.config.docker.socket));
        }

        spec
    }
}

enum RunOutcome {
    Finished(crate::runtime::ContainerRun),
    Cancelled,
    TimedOut,
}

/// Resolves when the step's time limit expires; never resolves without one
async fn step_deadline(minutes: Option<f64>) {
    match minutes {
        Some(minutes) => tokio::time::sleep(Duration::from_secs_f64(minutes * 60.0)).await,
        None => std::future::pending::<()>().await,
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! List command - show selectable pipelines

use colored::Colorize;
use miette::Result;

use crate::config::RunnerConfig;
use crate::document::PipelineItem;
use crate::engine::Engine;

/// Run the list command
pub async fn run(verbose: bool) -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let engine = Engine::new(&cwd, RunnerConfig::load(&cwd, None)?);
    let document = engine.load_document()?;

    let labels = document.pipeline_labels();
    if labels.is_empty() {
        println!("{}", "No pipelines defined.".yellow());
        return Ok(());
    }

    println!("{}:", "Pipelines".bold());
    for label in &labels {
        if verbose {
            let pipeline = match label.split_once('/') {
                None => document.pipelines.default.as_ref(),
                Some(("branches", name)) => document.pipelines.branches.get(name),
                Some(("tags", name)) => document.pipelines.tags.get(name),
                Some(("custom", name)) => document.pipelines.custom.get(name),
                Some(_) => None,
            };
            let detail = pipeline
                .map(|p| {
                    let groups = p
                        .items
                        .iter()
                        .filter(|item| matches!(item, PipelineItem::Parallel(_)))
                        .count();
                    if groups > 0 {
                        format!("{} step(s), {} parallel group(s)", p.step_count(), groups)
                    } else {
                        format!("{} step(s)", p.step_count())
                    }
                })
                .unwrap_or_default();
            println!("  - {} {}", label, format!("({detail})").dimmed());
        } else {
            println!("  - {label}");
        }
    }

    Ok(())
}

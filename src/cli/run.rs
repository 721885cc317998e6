// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Run command - execute a pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use crate::config::RunnerConfig;
use crate::document::Selection;
use crate::engine::{Engine, ExecutionResult, RunOptions, StepStatus};

/// Run the selected pipeline
pub async fn run(
    pipeline: Option<String>,
    branch: Option<String>,
    custom: Option<String>,
    env_file: Option<PathBuf>,
    dry_run: bool,
    verbose: bool,
) -> Result<()> {
    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let mut config = RunnerConfig::load(&cwd, None)?;
    if verbose {
        config.logging.verbose = true;
    }

    let engine = Engine::new(&cwd, config);
    let result = engine
        .run(RunOptions {
            selection: Selection {
                custom,
                branch,
                pipeline,
            },
            dry_run,
            env_file,
        })
        .await?;

    print_summary(&result, verbose);

    if result.success {
        Ok(())
    } else {
        Err(miette::miette!("Pipeline execution failed"))
    }
}

fn print_summary(result: &ExecutionResult, verbose: bool) {
    println!();
    println!("{}: {}", "Pipeline".bold(), result.label);
    println!("{}", "═".repeat(50));

    for step in result.step_results() {
        match step.status {
            StepStatus::Succeeded => println!(
                "  {} {} ({:.1}s)",
                "✓".green(),
                step.name.bold(),
                step.duration.as_secs_f64()
            ),
            StepStatus::Failed => {
                println!(
                    "  {} {} (exit {}, {:.1}s)",
                    "✗".red(),
                    step.name.bold(),
                    step.exit_code,
                    step.duration.as_secs_f64()
                );
                if let Some(summary) = step.error_summary() {
                    println!("    {}", summary.dimmed());
                }
            }
            StepStatus::Cancelled => {
                println!("  {} {} {}", "⊘".yellow(), step.name.bold(), "cancelled".dimmed())
            }
            _ => {}
        }
        if verbose && !step.output.is_empty() {
            for chunk in &step.output {
                for line in chunk.lines() {
                    println!("    {}", line.dimmed());
                }
            }
        }
    }

    println!();
    if result.success {
        println!(
            "{}",
            format!(
                "Pipeline completed successfully in {:.1}s",
                result.duration.as_secs_f64()
            )
            .green()
        );
    } else {
        let banner = match (&result.error, result.failed_step()) {
            (Some(error), _) => format!("Pipeline aborted: {error}"),
            (None, Some(step)) => format!("Pipeline failed at step '{}'", step.name),
            (None, None) => "Pipeline failed".to_string(),
        };
        println!(
            "{}",
            format!("{banner} ({:.1}s)", result.duration.as_secs_f64()).red()
        );
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Validate command - check the pipeline file

use colored::Colorize;
use miette::Result;

use crate::config::RunnerConfig;
use crate::engine::Engine;

/// Run the validate command
pub async fn run(verbose: bool) -> Result<()> {
    println!("{}", "Validating pipeline file...".bold());
    println!();

    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let engine = Engine::new(&cwd, RunnerConfig::load(&cwd, None)?);

    let (valid, diagnostics) = match engine.validate() {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("  {} Failed to load pipeline file", "✗".red());
            eprintln!();
            return Err(e.into());
        }
    };

    println!("  {} Pipeline file parses", "✓".green());

    if !diagnostics.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &diagnostics.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !diagnostics.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &diagnostics.warnings {
            println!("  {} {}", "⚠".yellow(), warning);
        }
    }

    if verbose {
        if let Ok(labels) = engine.list_pipelines() {
            println!();
            println!("{}:", "Pipelines".bold());
            for label in labels {
                println!("  - {label}");
            }
        }
    }

    println!();
    if valid {
        if diagnostics.has_warnings() {
            println!("{}", "Pipeline file is valid but has warnings.".yellow().bold());
        } else {
            println!("{}", "Pipeline file is valid!".green().bold());
        }
        Ok(())
    } else {
        Err(miette::miette!("Pipeline validation failed"))
    }
}

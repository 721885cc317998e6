// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Clean command - clear caches and artifacts

use colored::Colorize;
use miette::Result;

use crate::config::RunnerConfig;
use crate::engine::{ClearOptions, Engine};

/// Run the clean command. With no flags both stores are cleared.
pub async fn run(cache: bool, artifacts: bool) -> Result<()> {
    let options = if !cache && !artifacts {
        ClearOptions::default()
    } else {
        ClearOptions { cache, artifacts }
    };

    let cwd = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;
    let engine = Engine::new(&cwd, RunnerConfig::load(&cwd, None)?);
    engine.clear_stores(options)?;

    let what = match (options.cache, options.artifacts) {
        (true, true) => "caches and artifacts",
        (true, false) => "caches",
        (false, true) => "artifacts",
        (false, false) => unreachable!(),
    };
    println!("{}", format!("Cleared {what}.").green());

    Ok(())
}

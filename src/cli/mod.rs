// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for bbpl.

pub mod clean;
pub mod list;
pub mod run;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Run Bitbucket Pipelines locally
///
/// Executes bitbucket-pipelines.yml against a local Docker-compatible
/// runtime, with caches and artifacts carried between steps and runs.
#[derive(Parser, Debug)]
#[clap(
    name = "bbpl",
    version,
    about = "Run Bitbucket Pipelines locally against Docker",
    long_about = None,
    after_help = "Examples:\n\
        bbpl run                        Run the default pipeline\n\
        bbpl run --branch main          Run the pipeline matching a branch\n\
        bbpl run --custom release       Run a custom pipeline\n\
        bbpl validate                   Check the pipeline file\n\
        bbpl list                       List selectable pipelines\n\
        bbpl clean                      Clear caches and artifacts\n\n\
        See 'bbpl <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run {
        /// Explicit pipeline id (only "default" is accepted)
        #[clap(short, long)]
        pipeline: Option<String>,

        /// Select the pipeline matching this branch
        #[clap(short, long)]
        branch: Option<String>,

        /// Run a custom pipeline by name
        #[clap(short, long)]
        custom: Option<String>,

        /// Extra environment file loaded for every step
        #[clap(long, value_name = "FILE")]
        env_file: Option<PathBuf>,

        /// Show what would run without starting containers
        #[clap(long)]
        dry_run: bool,
    },

    /// Validate the pipeline file
    Validate,

    /// List selectable pipelines
    List,

    /// Clear cached data (both stores unless narrowed by flags)
    Clean {
        /// Clear the cache store only
        #[clap(long)]
        cache: bool,

        /// Clear the artifact store only
        #[clap(long)]
        artifacts: bool,
    },
}

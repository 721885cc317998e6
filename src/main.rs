// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! bbpl - run Bitbucket Pipelines locally against Docker

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bbpl::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; BBPL_LOG_LEVEL mirrors the config knob for
    // users who have not set RUST_LOG
    let default_filter = format!(
        "bbpl={}",
        std::env::var("BBPL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            pipeline,
            branch,
            custom,
            env_file,
            dry_run,
        } => {
            bbpl::cli::run::run(pipeline, branch, custom, env_file, dry_run, cli.verbose).await
        }
        Commands::Validate => bbpl::cli::validate::run(cli.verbose).await,
        Commands::List => bbpl::cli::list::run(cli.verbose).await,
        Commands::Clean { cache, artifacts } => bbpl::cli::clean::run(cache, artifacts).await,
    }
}

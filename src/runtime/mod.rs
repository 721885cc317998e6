// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 bbpl contributors

//! Container runtime integration
//!
//! The [`ContainerSpec`] describes what to run; the [`RuntimeDriver`]
//! talks to the Docker-compatible API to run it.

pub mod driver;
pub mod spec;

pub use driver::{ContainerHandle, ContainerRun, RuntimeDriver};
pub use spec::{
    build_step_command, parse_cpus, parse_memory, shell_quote, ContainerSpec, AFTER_SCRIPT_PATH,
    SCRIPT_PATH,
};

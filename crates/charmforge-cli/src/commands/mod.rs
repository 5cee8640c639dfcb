//! CLI command implementations.

pub mod build;
pub mod promote;
pub mod validate;

use anyhow::{Context, Result};
use charmforge_executor::{DockerImagePuller, ProcessRunner};
use charmforge_pipeline::{RunOutcome, Toolchain};
use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

/// Tools backed by real subprocesses and the local Docker daemon.
fn toolchain(tool_env: BTreeMap<String, String>) -> Result<Toolchain> {
    let images = DockerImagePuller::new().context("Failed to connect to Docker")?;
    Ok(Toolchain::new(
        Arc::new(ProcessRunner::new()),
        Arc::new(images),
        tool_env,
    ))
}

/// Fold several outcomes: all succeeded, all failed, or anything between.
fn combined_outcome(outcomes: &[RunOutcome]) -> RunOutcome {
    if outcomes.iter().all(|o| *o == RunOutcome::Succeeded) {
        RunOutcome::Succeeded
    } else if outcomes.iter().all(|o| *o == RunOutcome::Failed) {
        RunOutcome::Failed
    } else {
        RunOutcome::PartiallySucceeded
    }
}

fn exit_code(outcome: RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Succeeded => ExitCode::SUCCESS,
        RunOutcome::PartiallySucceeded => ExitCode::from(2),
        RunOutcome::Failed => ExitCode::FAILURE,
    }
}

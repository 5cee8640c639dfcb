//! Process execution and tool clients for charmforge.
//!
//! Provides:
//! - A tokio subprocess [`ToolRunner`](charmforge_core::ToolRunner)
//! - The retrying executor for flaky network-bound calls
//! - Typed clients for the charm tool, git, the bundle assembler and docker

pub mod bundle;
pub mod charm;
pub mod docker;
pub mod git;
pub mod process;
pub mod retry;

pub use bundle::BundleAssembler;
pub use charm::{CharmTool, StoreResource};
pub use docker::DockerImagePuller;
pub use git::GitTool;
pub use process::ProcessRunner;
pub use retry::{AttemptOutcome, AttemptRecord, RetryingExecutor};

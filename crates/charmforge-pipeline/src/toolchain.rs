//! The set of external tools a run drives.

use charmforge_core::{ImagePuller, ToolRunner};
use charmforge_executor::{BundleAssembler, CharmTool, GitTool, RetryingExecutor};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Typed tool clients over one shared [`ToolRunner`], plus the retry
/// executor every retried call goes through.
#[derive(Clone)]
pub struct Toolchain {
    /// Raw runner, for resource-builder scripts.
    pub runner: Arc<dyn ToolRunner>,
    pub charm: CharmTool,
    pub git: GitTool,
    pub bundle: BundleAssembler,
    pub images: Arc<dyn ImagePuller>,
    pub retry: RetryingExecutor,
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Toolchain")
            .field("charm", &self.charm)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Toolchain {
    /// Build clients over `runner`. `tool_env` is forwarded to every charm
    /// tool invocation, usually [`CharmEnv::tool_env`](charmforge_config::CharmEnv::tool_env).
    pub fn new(
        runner: Arc<dyn ToolRunner>,
        images: Arc<dyn ImagePuller>,
        tool_env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            charm: CharmTool::new(runner.clone(), tool_env),
            git: GitTool::new(runner.clone()),
            bundle: BundleAssembler::new(runner.clone()),
            runner,
            images,
            retry: RetryingExecutor::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryingExecutor) -> Self {
        self.retry = retry;
        self
    }
}

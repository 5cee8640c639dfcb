//! Client for the bundle assembly script shipped in the bundle repository.

use charmforge_core::{Channel, ToolInvocation, ToolResult, ToolRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs `<repo>/bundle` to assemble a bundle from fragments.
#[derive(Clone)]
pub struct BundleAssembler {
    runner: Arc<dyn ToolRunner>,
}

impl std::fmt::Debug for BundleAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleAssembler").finish_non_exhaustive()
    }
}

impl BundleAssembler {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    pub fn script(repo_dir: &Path) -> PathBuf {
        repo_dir.join("bundle")
    }

    /// Assemble `fragments` targeting `channel` into `output_dir`.
    pub async fn assemble(
        &self,
        repo_dir: &Path,
        output_dir: &Path,
        channel: &Channel,
        fragments: &[String],
    ) -> ToolResult<()> {
        let inv = ToolInvocation::new(Self::script(repo_dir).to_string_lossy())
            .arg("-o")
            .arg(output_dir.to_string_lossy())
            .args(["-c", channel.as_str()])
            .args(fragments.iter().cloned())
            .current_dir(repo_dir);
        self.runner.run(&inv).await.map(|_| ())
    }
}

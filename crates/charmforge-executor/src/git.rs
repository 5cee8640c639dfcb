//! Git client.

use charmforge_core::{ToolInvocation, ToolResult, ToolRunner};
use std::path::Path;
use std::sync::Arc;

/// Typed calls into git.
#[derive(Clone)]
pub struct GitTool {
    runner: Arc<dyn ToolRunner>,
}

impl std::fmt::Debug for GitTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTool").finish_non_exhaustive()
    }
}

impl GitTool {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    /// Clone `url` into `dest`, optionally at `branch`.
    pub async fn clone_repo(&self, url: &str, branch: Option<&str>, dest: &Path) -> ToolResult<()> {
        let mut inv = ToolInvocation::new("git").arg("clone");
        if let Some(branch) = branch {
            inv = inv.args(["--branch", branch]);
        }
        let inv = inv.arg(url).arg(dest.to_string_lossy());
        self.runner.run(&inv).await.map(|_| ())
    }

    /// Force-checkout `branch` in the repository at `repo`.
    pub async fn checkout_force(&self, repo: &Path, branch: &str) -> ToolResult<()> {
        let inv = ToolInvocation::new("git")
            .args(["checkout", "-f", branch])
            .current_dir(repo);
        self.runner.run(&inv).await.map(|_| ())
    }

    /// Commit currently checked out in `repo`.
    pub async fn head_revision(&self, repo: &Path) -> ToolResult<String> {
        let inv = ToolInvocation::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(repo);
        let output = self.runner.run(&inv).await?;
        Ok(output.stdout.trim().to_string())
    }
}

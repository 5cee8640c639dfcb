//! Tool runner trait and invocation types.
//!
//! Every external program the pipeline drives (git, the charm tool, the
//! bundle assembler, resource-builder scripts) is reached through a
//! [`ToolRunner`]. Container image pre-fetch goes through an [`ImagePuller`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A single invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Program to run, resolved through `PATH` unless absolute.
    pub program: String,
    /// Arguments, passed verbatim.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// First positional argument, usually the tool's subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Stdout followed by stderr, for tools that report on either stream.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Which stream a line of tool output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Failure shapes of an external program.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ToolError {
    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("{program} exited with {}: {output}", exit_label(.code))]
    NonZeroExit {
        program: String,
        /// `None` when the process was killed by a signal.
        code: Option<i32>,
        output: String,
    },

    #[error("{service} request failed: {message}")]
    Daemon { service: String, message: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "a signal".to_string(),
    }
}

impl ToolError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::NonZeroExit { code, .. } => *code,
            _ => None,
        }
    }

    /// The single generic failure exit (status 1).
    pub fn is_generic_failure(&self) -> bool {
        self.exit_code() == Some(1)
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Runs external programs.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run an invocation to completion. Non-zero exits are errors.
    async fn run(&self, invocation: &ToolInvocation) -> ToolResult<ToolOutput>;
}

/// Fetches container images so a later push can reference a local copy.
#[async_trait]
pub trait ImagePuller: Send + Sync {
    async fn pull(&self, image: &str) -> ToolResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_builder() {
        let inv = ToolInvocation::new("charm")
            .arg("build")
            .args(["-r", "--force"])
            .current_dir("/tmp/src");

        assert_eq!(inv.subcommand(), Some("build"));
        assert_eq!(inv.display(), "charm build -r --force");
        assert_eq!(inv.cwd.as_deref(), Some(Path::new("/tmp/src")));
    }

    #[test]
    fn test_generic_failure_is_exit_one_only() {
        let exit = |code| ToolError::NonZeroExit {
            program: "charm".to_string(),
            code,
            output: String::new(),
        };
        assert!(exit(Some(1)).is_generic_failure());
        assert!(!exit(Some(2)).is_generic_failure());
        assert!(!exit(None).is_generic_failure());
        assert_eq!(exit(None).to_string(), "charm exited with a signal: ");
    }
}

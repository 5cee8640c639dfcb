//! Subprocess tool runner.

use async_trait::async_trait;
use charmforge_core::{LogStream, ToolError, ToolInvocation, ToolOutput, ToolResult, ToolRunner};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, warn};

/// Lines of output kept in a failure message.
const ERROR_TAIL_LINES: usize = 20;

/// Runs tools as local subprocesses, streaming their output to the log.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Environment applied to every invocation, below the invocation's own.
    env: BTreeMap<String, String>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(env: BTreeMap<String, String>) -> Self {
        Self { env }
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &ToolInvocation) -> ToolResult<ToolOutput> {
        let program = invocation.program.clone();
        let launch_error = |e: std::io::Error| ToolError::Launch {
            program: program.clone(),
            message: e.to_string(),
        };

        debug!(command = %invocation.display(), cwd = ?invocation.cwd, "Running tool");

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&self.env)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(launch_error)?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(ToolError::Launch {
                program: program.clone(),
                message: "output pipes unavailable".to_string(),
            });
        };

        // Tool output is not guaranteed to be UTF-8.
        let stdout_lines =
            SplitStream::new(BufReader::new(stdout).split(b'\n')).map(|l| (LogStream::Stdout, l));
        let stderr_lines =
            SplitStream::new(BufReader::new(stderr).split(b'\n')).map(|l| (LogStream::Stderr, l));
        let mut lines = stdout_lines.merge(stderr_lines);

        let mut output = ToolOutput::default();
        while let Some((stream, line)) = lines.next().await {
            match line {
                Ok(bytes) => {
                    let decoded = String::from_utf8_lossy(&bytes);
                    let line = decoded.strip_suffix('\r').unwrap_or(&decoded[..]);
                    debug!(program = %program, ?stream, " -- {}", line.trim_end());
                    let buf = match stream {
                        LogStream::Stdout => &mut output.stdout,
                        LogStream::Stderr => &mut output.stderr,
                    };
                    buf.push_str(line);
                    buf.push('\n');
                }
                Err(e) => {
                    warn!(program = %program, error = %e, "Error reading tool output");
                    break;
                }
            }
        }
        // Close our ends of the pipes so a child still writing gets EPIPE
        // instead of blocking forever.
        drop(lines);

        let status = child.wait().await.map_err(launch_error)?;
        if status.success() {
            Ok(output)
        } else {
            Err(ToolError::NonZeroExit {
                program: program.clone(),
                code: status.code(),
                output: tail(&output.combined(), ERROR_TAIL_LINES),
            })
        }
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolInvocation {
        ToolInvocation::new("sh").args(["-c", script])
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let output = ProcessRunner::new()
            .run(&sh("echo out; echo err >&2"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_code_and_output() {
        let err = ProcessRunner::new()
            .run(&sh("echo boom >&2; exit 3"))
            .await
            .unwrap_err();
        match err {
            ToolError::NonZeroExit { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stall_the_reader() {
        let script = "printf 'bad \\377 byte\\n'; head -c 300000 /dev/zero | tr '\\0' a";
        let output = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ProcessRunner::new().run(&sh(script)),
        )
        .await
        .expect("tool run did not finish")
        .unwrap();

        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("bad \u{FFFD} byte"));
        assert_eq!(lines.next().map(str::len), Some(300000));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let err = ProcessRunner::new()
            .run(&ToolInvocation::new("charmforge-no-such-tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_environment_and_cwd() {
        let dir = std::env::temp_dir();
        let runner = ProcessRunner::with_env(BTreeMap::from([(
            "CHARMFORGE_BASE".to_string(),
            "base".to_string(),
        )]));
        let inv = sh("echo $CHARMFORGE_BASE $CHARMFORGE_EXTRA; pwd")
            .current_dir(&dir)
            .envs(&BTreeMap::from([(
                "CHARMFORGE_EXTRA".to_string(),
                "extra".to_string(),
            )]));

        let output = runner.run(&inv).await.unwrap();
        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("base extra"));
        let cwd = std::path::PathBuf::from(lines.next().unwrap());
        assert_eq!(cwd.canonicalize().unwrap(), dir.canonicalize().unwrap());
    }
}

//! External process execution with timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

/// How much captured output is kept for diagnostics.
pub const DIAGNOSTIC_TAIL_BYTES: usize = 4096;

/// How long a killed process's pipes are drained before giving up on them.
/// Grandchildren may still hold them open.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// One process to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Label for logs and errors.
    pub name: String,

    /// Command line (first element is the executable).
    pub command: Vec<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            env: Vec::new(),
            working_dir: None,
            timeout_secs,
        }
    }
}

/// Result of a process that ran to exit.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,

    pub stderr: String,

    pub duration_ms: u64,

    pub success: bool,
}

impl CommandOutput {
    /// Tail of stderr, or of stdout when stderr is empty.
    pub fn diagnostics(&self) -> String {
        diagnostic_tail(&self.stdout, &self.stderr)
    }
}

fn diagnostic_tail(stdout: &str, stderr: &str) -> String {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    tail(text.trim(), DIAGNOSTIC_TAIL_BYTES).to_string()
}

/// Last `max` bytes of `text`, cut on a char boundary.
pub fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{name}: empty command")]
    EmptyCommand { name: String },

    #[error("{name}: failed to start '{program}': {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name}: timed out after {timeout_secs} seconds{}", with_output(.diagnostics))]
    TimedOut {
        name: String,
        timeout_secs: u64,
        /// Output captured before the process was killed.
        diagnostics: String,
    },

    #[error("{name}: failed while waiting for exit: {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

fn with_output(diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(": {diagnostics}")
    }
}

/// One output pipe, read into a shared buffer as data arrives so a killed
/// process still leaves what it wrote.
struct Capture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl Capture {
    fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|mut pipe| {
            let sink = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = [0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => sink
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..n]),
                    }
                }
            })
        });
        Self { buffer, reader }
    }

    /// Wait for the pipe to close (at most `grace` when given) and return
    /// everything read.
    async fn finish(mut self, grace: Option<Duration>) -> String {
        if let Some(reader) = self.reader.as_mut() {
            match grace {
                Some(grace) => {
                    if tokio::time::timeout(grace, &mut *reader).await.is_err() {
                        reader.abort();
                    }
                }
                None => {
                    let _ = reader.await;
                }
            }
        }
        let bytes = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Runs external commands.
pub struct CommandRunner;

impl CommandRunner {
    /// Run `spec` to completion and capture its output.
    ///
    /// On unix the child leads its own process group, so a terminal Ctrl-C
    /// reaches only this process and in-flight work is left to finish.
    /// On timeout the child is killed and whatever it printed so far is
    /// returned in [`CommandError::TimedOut`]; nothing it writes afterwards
    /// can be mistaken for a result.
    pub async fn execute(spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let start = Instant::now();

        let Some((exe, args)) = spec.command.split_first() else {
            return Err(CommandError::EmptyCommand {
                name: spec.name.clone(),
            });
        };

        let mut command = Command::new(exe);
        command
            .args(args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        debug!(name = %spec.name, program = %exe, "spawning");
        let mut child = command.spawn().map_err(|source| CommandError::Spawn {
            name: spec.name.clone(),
            program: exe.clone(),
            source,
        })?;
        let stdout = Capture::start(child.stdout.take());
        let stderr = Capture::start(child.stderr.take());

        let waited = if spec.timeout_secs > 0 {
            match tokio::time::timeout(Duration::from_secs(spec.timeout_secs), child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    let _ = child.kill().await;
                    let stdout = stdout.finish(Some(DRAIN_GRACE)).await;
                    let stderr = stderr.finish(Some(DRAIN_GRACE)).await;
                    return Err(CommandError::TimedOut {
                        name: spec.name.clone(),
                        timeout_secs: spec.timeout_secs,
                        diagnostics: diagnostic_tail(&stdout, &stderr),
                    });
                }
            }
        } else {
            child.wait().await
        };
        let status = waited.map_err(|source| CommandError::Wait {
            name: spec.name.clone(),
            source,
        })?;

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: stdout.finish(None).await,
            stderr: stderr.finish(None).await,
            duration_ms: start.elapsed().as_millis() as u64,
            success: status.success(),
        })
    }

    /// Whether `program` can be started at all.
    ///
    /// The probe process is killed right away; only its launch matters.
    pub async fn is_available(program: &str) -> bool {
        let spawned = Command::new(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        match spawned {
            Ok(mut child) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                true
            }
            Err(e) => {
                debug!(program = %program, error = %e, "program not available");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout_secs: u64) -> CommandSpec {
        CommandSpec::new(
            "test",
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs,
        )
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let result = CommandRunner::execute(&sh("echo hello", 60))
            .await
            .expect("execute failed");
        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let result = CommandRunner::execute(&sh("echo broken >&2; exit 3", 60))
            .await
            .expect("execute failed");
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.diagnostics(), "broken");
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let mut spec = sh("printf '%s' \"$RETROVIBEZ_TEST\"", 60);
        spec.env.push(("RETROVIBEZ_TEST".into(), "value".into()));
        let result = CommandRunner::execute(&spec).await.expect("execute failed");
        assert_eq!(result.stdout, "value");
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = CommandRunner::execute(&sh("sleep 5", 1)).await.unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { timeout_secs: 1, .. }));
        assert_eq!(err.to_string(), "test: timed out after 1 seconds");
    }

    #[tokio::test]
    async fn test_timeout_keeps_captured_output() {
        let err = CommandRunner::execute(&sh("echo 'waiting for license server' >&2; sleep 10", 1))
            .await
            .unwrap_err();
        match &err {
            CommandError::TimedOut { diagnostics, .. } => {
                assert_eq!(diagnostics, "waiting for license server")
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(err.to_string().ends_with(": waiting for license server"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_child_leads_its_own_process_group() {
        // Field 5 of /proc/<pid>/stat is the process group id.
        let script = "echo $$ $(cut -d' ' -f5 /proc/$$/stat)";
        let result = CommandRunner::execute(&sh(script, 10)).await.expect("execute failed");
        let fields: Vec<&str> = result.stdout.split_whitespace().collect();
        assert_eq!(fields.len(), 2, "stdout: {}", result.stdout);
        assert_eq!(fields[0], fields[1]);

        let own = std::fs::read_to_string("/proc/self/stat").expect("read stat");
        let own_group = own
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().nth(2))
            .expect("pgrp field");
        assert_ne!(fields[1], own_group);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let spec = CommandSpec::new("ghost", vec!["retrovibez-no-such-binary".into()], 5);
        let err = CommandRunner::execute(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert!(!CommandRunner::is_available("retrovibez-no-such-binary").await);
        assert!(CommandRunner::is_available("sh").await);
    }

    #[tokio::test]
    async fn test_empty_command() {
        let spec = CommandSpec::new("empty", vec![], 5);
        assert!(matches!(
            CommandRunner::execute(&spec).await,
            Err(CommandError::EmptyCommand { .. })
        ));
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("aé", 1), "");
    }
}

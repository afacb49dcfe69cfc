//! Prompt execution through the Claude CLI
//!
//! The CLI is run once per prompt in print mode. Its stdout is the
//! generated notification text. Failures keep whatever output was captured
//! so callers can tell an expired token apart from other errors.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(180_000);

/// Output fragments that indicate the OAuth token was rejected
const EXPIRED_TOKEN_MARKERS: [&str; 3] = ["401", "authentication_error", "OAuth token has expired"];

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("prompt execution timed out after {}s", .limit.as_secs())]
    Timeout {
        limit: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("prompt execution exited with code {}: {}", display_code(.code), tail(.stderr, .stdout))]
    NonZeroExit {
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("failed to run prompt executor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("prompt execution produced no output")]
    EmptyOutput,
}

impl ExecutionError {
    /// Captured stdout and stderr, joined
    pub fn output(&self) -> String {
        match self {
            Self::Timeout { stdout, stderr, .. } | Self::NonZeroExit { stdout, stderr, .. } => {
                format!("{}\n{}", stdout, stderr)
            }
            Self::Spawn(e) => e.to_string(),
            Self::EmptyOutput => String::new(),
        }
    }

    /// Whether the failure looks like the CLI rejected an expired token
    pub fn looks_like_expired_token(&self) -> bool {
        let output = self.output();
        if EXPIRED_TOKEN_MARKERS.iter().any(|m| output.contains(m)) {
            return true;
        }
        let lower = output.to_lowercase();
        lower.contains("token") && lower.contains("expired")
    }
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
}

fn tail<'a>(stderr: &'a str, stdout: &'a str) -> &'a str {
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let text = text.trim();
    match text.char_indices().rev().nth(299) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}

/// Turns a prompt into notification text
#[async_trait]
pub trait PromptExecutor: Send + Sync {
    async fn execute(&self, prompt: &str) -> Result<String, ExecutionError>;
}

/// Runs `<claude> --print --permission-mode bypassPermissions <prompt>`
#[derive(Debug, Clone)]
pub struct ClaudeCliExecutor {
    program: PathBuf,
    config_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ClaudeCliExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config_dir: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Directory passed as `CLAUDE_CONFIG_DIR`
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["--print", "--permission-mode", "bypassPermissions"])
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config_dir {
            cmd.env("CLAUDE_CONFIG_DIR", dir);
        }
        if let Some(path) = path_with_local_bin() {
            cmd.env("PATH", path);
        }
        cmd
    }
}

#[async_trait]
impl PromptExecutor for ClaudeCliExecutor {
    async fn execute(&self, prompt: &str) -> Result<String, ExecutionError> {
        debug!(
            program = %self.program.display(),
            prompt_len = prompt.len(),
            "[Executor] Running prompt"
        );

        let child = self.command(prompt).spawn().map_err(ExecutionError::Spawn)?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(ExecutionError::Spawn)?,
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "[Executor] Prompt timed out, child killed");
                return Err(ExecutionError::Timeout {
                    limit: self.timeout,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(ExecutionError::NonZeroExit {
                code: output.status.code(),
                stdout,
                stderr,
            });
        }
        if stdout.is_empty() {
            return Err(ExecutionError::EmptyOutput);
        }
        Ok(stdout)
    }
}

/// Current `PATH` with `~/.local/bin` first, deduplicated
fn path_with_local_bin() -> Option<OsString> {
    let local_bin = dirs::home_dir()?.join(".local").join("bin");
    let current = std::env::var_os("PATH").unwrap_or_default();

    let mut seen = HashSet::new();
    let entries = std::iter::once(local_bin)
        .chain(std::env::split_paths(&current))
        .filter(|p| !p.as_os_str().is_empty() && seen.insert(p.clone()))
        .collect::<Vec<_>>();
    std::env::join_paths(entries).ok()
}

//! Transport command execution with bounded timeouts
//!
//! Every command against the device control channel runs under its own
//! timeout and resolves to a [`CmdOutcome`] rather than raising: callers must
//! branch on all three variants. Low-level process errors never propagate
//! past this module.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

/// Tri-state outcome of a transport command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmdOutcome {
    /// The command ran to completion (successfully or not)
    Completed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    /// The command did not finish within its timeout. The child process is
    /// killed when the outcome is returned.
    TimedOut,
    /// The command could not be started at all (binary missing or not
    /// executable)
    Unavailable,
}

impl CmdOutcome {
    /// True only for a completed command with exit code 0
    pub fn success(&self) -> bool {
        matches!(self, CmdOutcome::Completed { exit_code: 0, .. })
    }

    /// Stdout of a completed command, if any
    pub fn stdout(&self) -> Option<&str> {
        match self {
            CmdOutcome::Completed { stdout, .. } => Some(stdout),
            _ => None,
        }
    }

    /// Stdout and stderr concatenated, for output-sniffing callers.
    ///
    /// adb reports install verdicts on either stream depending on version.
    pub fn combined_output(&self) -> String {
        match self {
            CmdOutcome::Completed { stdout, stderr, .. } => format!("{}{}", stdout, stderr),
            _ => String::new(),
        }
    }

    /// Short human-readable description for journal/error text
    pub fn describe(&self) -> String {
        match self {
            CmdOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                let detail = if stderr.trim().is_empty() {
                    stdout.trim()
                } else {
                    stderr.trim()
                };
                format!("exit {}: {}", exit_code, detail)
            }
            CmdOutcome::TimedOut => "command timed out".to_string(),
            CmdOutcome::Unavailable => "adb unavailable".to_string(),
        }
    }
}

/// Async transport command interface.
///
/// Exactly one production implementation exists ([`AdbTransport`]); tests
/// substitute scripted fakes. All probes and orchestrators are generic over
/// this trait, which is what makes the state machine and installer testable
/// without a device.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Run one transport command with the given arguments under `timeout`.
    async fn run(&self, args: &[String], timeout: Duration) -> CmdOutcome;
}

/// Production transport: shells out to the `adb` binary.
#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb_path: String,
}

impl AdbTransport {
    /// Transport using `adb` from PATH
    pub fn new() -> Self {
        Self::with_path("adb")
    }

    /// Transport using an explicit adb binary
    pub fn with_path(adb_path: impl Into<String>) -> Self {
        Self {
            adb_path: adb_path.into(),
        }
    }

    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }
}

impl Default for AdbTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for AdbTransport {
    async fn run(&self, args: &[String], limit: Duration) -> CmdOutcome {
        tracing::debug!("adb {} (timeout {:?})", args.join(" "), limit);

        let mut command = Command::new(&self.adb_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true); // a timed-out child must not linger

        match timeout(limit, command.output()).await {
            Err(_) => {
                tracing::warn!("adb {} timed out after {:?}", args.join(" "), limit);
                CmdOutcome::TimedOut
            }
            Ok(Err(e)) => {
                tracing::debug!("adb spawn failed: {}", e);
                CmdOutcome::Unavailable
            }
            Ok(Ok(output)) => CmdOutcome::Completed {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
        }
    }
}

/// Build an argument vector from string literals
pub(crate) fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

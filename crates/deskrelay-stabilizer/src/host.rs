// crates/deskrelay-stabilizer/src/host.rs
// ============================================================================
// Module: Host Commands
// Description: OS command descriptions and the runner seam that executes them.
// Purpose: Keep address and NAT changes testable without root privileges.
// Dependencies: async-trait, tokio
// ============================================================================

//! ## Overview
//! [`HostCommand`] is a program plus argv, never a shell string. Commands
//! marked tolerant are expected to fail when the state they remove is already
//! gone. [`SystemCommandRunner`] executes commands with `tokio::process`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;

// ============================================================================
// SECTION: Commands
// ============================================================================

/// One OS command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostCommand {
    /// Program name.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Failure is expected when the target state is already absent.
    pub tolerate_failure: bool,
}

impl HostCommand {
    /// Builds a command whose failure is fatal.
    #[must_use]
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            tolerate_failure: false,
        }
    }

    /// Marks the command as allowed to fail.
    #[must_use]
    pub const fn tolerant(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Host command failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Program could not be started.
    #[error("failed to spawn {command}: {detail}")]
    Spawn {
        /// Rendered command.
        command: String,
        /// Failure detail.
        detail: String,
    },
    /// Program exited unsuccessfully.
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        /// Rendered command.
        command: String,
        /// Exit status.
        status: String,
        /// Captured stderr.
        stderr: String,
    },
    /// Program did not finish in time.
    #[error("{command} timed out")]
    TimedOut {
        /// Rendered command.
        command: String,
    },
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Executes host commands.
#[async_trait]
pub trait HostCommandRunner: Send + Sync {
    /// Runs a command and returns its stdout.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the command cannot run or exits non-zero.
    async fn run(&self, command: &HostCommand) -> Result<String, HostError>;
}

/// Runner backed by real processes.
#[derive(Debug, Clone, Copy)]
pub struct SystemCommandRunner {
    /// Per-command timeout.
    timeout: Duration,
}

impl SystemCommandRunner {
    /// Creates a runner with a per-command timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
        }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl HostCommandRunner for SystemCommandRunner {
    async fn run(&self, command: &HostCommand) -> Result<String, HostError> {
        let rendered = command.to_string();
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| HostError::TimedOut {
                command: rendered.clone(),
            })?
            .map_err(|err| HostError::Spawn {
                command: rendered.clone(),
                detail: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(HostError::Failed {
                command: rendered,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runs commands in order, skipping failures of tolerant commands.
///
/// # Errors
///
/// Returns the first failure of a non-tolerant command.
pub async fn run_all(
    runner: &dyn HostCommandRunner,
    commands: &[HostCommand],
) -> Result<(), HostError> {
    for command in commands {
        match runner.run(command).await {
            Ok(_) => {}
            Err(_) if command.tolerate_failure => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

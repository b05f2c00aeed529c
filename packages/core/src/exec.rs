//! Command execution abstraction.
//!
//! Mount, unmount and the vendor identity utilities are all external
//! programs. Routing them through the [`CommandRunner`] trait keeps the
//! scan loop testable without touching real block devices.

use std::process::Command;

use crate::error::{IoResultExt, Result};

/// Captured result of a finished external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
    /// Process exit code; -1 when terminated by a signal.
    pub code: i32,
}

impl CommandOutput {
    /// Returns true if the command exited with code zero.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Returns stdout with surrounding whitespace removed.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Executes external commands, returning captured output and exit status.
pub trait CommandRunner: Send + Sync {
    /// Runs `cmd` with `args`, waiting for it to finish.
    ///
    /// A non-zero exit code is not an error here; callers inspect
    /// [`CommandOutput::success`]. `Err` means the program could not be
    /// spawned at all.
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// [`CommandRunner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(cmd).args(args).output().command_context(cmd)?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            code: output.status.code().unwrap_or(-1),
        })
    }
}

//! Command execution abstraction for the `nft` binding.
//!
//! Every interaction with the packet filter goes through [`CommandExecutor`],
//! so the nftables engine can be unit-tested with a mock instead of a
//! privileged `nft` binary.

use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};

#[cfg(test)]
use mockall::automock;

/// Output from command execution
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code 0
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
            code: Some(0),
        }
    }

    /// Failed output with the given stderr (exit code 1).
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
            code: Some(1),
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Runs external programs.
///
/// Arguments are `&[String]` rather than `&[&str]` because mockall cannot
/// express the nested lifetime.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Run `cmd` with `args` and capture its output.
    ///
    /// A non-zero exit is reported through [`CommandOutput::success`];
    /// `Err` means the program could not be started at all.
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Executor backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for SystemExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("Failed to execute {}", cmd))?;
        Ok(output.into())
    }
}

/// Convert a slice of `&str` into owned arguments.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

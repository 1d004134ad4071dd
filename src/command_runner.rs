//! Abstraction over external command execution for testability.
//!
//! All subprocess spawns (launchers, container runtimes, analysis probes)
//! go through the [`CommandRunner`] trait so unit tests can substitute a
//! recording mock instead of touching the system.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Output, Stdio};
use tracing::debug;

/// Options for command execution.
#[derive(Debug, Default, Clone)]
pub struct CommandOptions {
    /// Working directory for the command.
    pub cwd: Option<PathBuf>,
    /// Additional environment variables, layered over the inherited ones.
    pub env: Vec<(String, String)>,
}

impl CommandOptions {
    /// Create options carrying extra environment variables.
    pub fn with_env(env: Vec<(String, String)>) -> Self {
        Self { cwd: None, env }
    }
}

/// Trait for abstracting external command execution.
pub trait CommandRunner: Send + Sync {
    /// Run a command and capture its full output (stdout + stderr + exit
    /// status). Used by analysis probes and detection children.
    fn run_output(&self, program: &str, args: &[String], options: &CommandOptions)
    -> Result<Output>;

    /// Run a command with inherited stdio and return only its exit
    /// status. Used by the launch and execute pipelines.
    fn run_status(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> Result<ExitStatus>;
}

/// Production implementation that delegates to [`std::process::Command`].
pub struct RealCommandRunner;

fn build(program: &str, args: &[String], options: &CommandOptions) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &options.env {
        cmd.env(key, value);
    }
    cmd
}

impl CommandRunner for RealCommandRunner {
    fn run_output(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> Result<Output> {
        debug!("Executing (captured): {program} {}", args.join(" "));
        build(program, args, options)
            .stdin(Stdio::inherit())
            .output()
            .with_context(|| format!("Failed to run '{program}'"))
    }

    fn run_status(
        &self,
        program: &str,
        args: &[String],
        options: &CommandOptions,
    ) -> Result<ExitStatus> {
        debug!("Executing: {program} {}", args.join(" "));
        build(program, args, options)
            .status()
            .with_context(|| format!("Failed to run '{program}'"))
    }
}

/// Re-emit the last lines of a failed subprocess's stderr, so the cause
/// survives even when the output was captured.
pub fn reemit_stderr(output: &Output, keep: usize) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().collect();
    let start = lines.len().saturating_sub(keep);
    for line in &lines[start..] {
        eprintln!("{line}");
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_real_runner_output() {
        let runner = RealCommandRunner;
        let output = runner
            .run_output("echo", &["hello".to_string()], &CommandOptions::default())
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[test]
    #[serial]
    fn test_real_runner_env() {
        let runner = RealCommandRunner;
        let options =
            CommandOptions::with_env(vec![("E4SCL_RUNNER_PROBE".to_string(), "yes".to_string())]);
        let output = runner
            .run_output("env", &[], &options)
            .unwrap();
        assert!(String::from_utf8_lossy(&output.stdout).contains("E4SCL_RUNNER_PROBE=yes"));
    }

    #[test]
    #[serial]
    fn test_real_runner_status() {
        let runner = RealCommandRunner;
        let status = runner
            .run_status("true", &[], &CommandOptions::default())
            .unwrap();
        assert!(status.success());
    }
}

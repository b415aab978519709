//! External process execution.
//!
//! Every interaction with the container engine or the instance helper goes
//! through [`CommandRunner`], so tests can script outputs without spawning
//! processes.

use std::ffi::OsString;
use std::future::{self, Future};
use std::pin::Pin;
use std::process::{Command, Output};

use shell_escape::unix::escape;
use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Human readable exit status, `unknown` when the process was killed.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised while running external commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CommandError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    Failure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

impl CommandError {
    /// Builds a [`CommandError::Failure`] from captured output.
    #[must_use]
    pub fn failure(program: &str, output: &CommandOutput) -> Self {
        Self::Failure {
            program: program.to_owned(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        }
    }
}

/// Future returned by [`CommandRunner::run_async`].
pub type OutputFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CommandOutput, CommandError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError>;

    /// Runs `program` without blocking the executor. Dropping the future
    /// before it resolves kills the process.
    ///
    /// The default runs [`CommandRunner::run`] to completion before
    /// returning, which suits in-memory fakes only.
    fn run_async<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> OutputFuture<'a> {
        Box::pin(future::ready(self.run(program, args)))
    }
}

fn captured(output: &Output) -> CommandOutput {
    CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = %render_command(program, args), "spawning");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| CommandError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(captured(&output))
    }

    fn run_async<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> OutputFuture<'a> {
        Box::pin(async move {
            tracing::debug!(command = %render_command(program, args), "spawning");
            let output = tokio::process::Command::new(program)
                .args(args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| CommandError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
            Ok(captured(&output))
        })
    }
}

/// Renders a program and its arguments as a shell-escaped string for logs.
#[must_use]
pub fn render_command(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(escape(program.into()));
    for arg in args {
        rendered.push(' ');
        let text = arg.to_string_lossy();
        rendered.push_str(escape(text).as_ref());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn render_command_escapes_arguments() {
        let args = vec![
            OsString::from("run"),
            OsString::from("--env"),
            OsString::from("KEY=a b"),
        ];
        assert_eq!(render_command("docker", &args), "docker run --env 'KEY=a b'");
    }

    #[rstest]
    #[case(Some(0), true)]
    #[case(Some(1), false)]
    #[case(None, false)]
    fn is_success_requires_zero_exit(#[case] code: Option<i32>, #[case] expected: bool) {
        let output = CommandOutput {
            code,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.is_success(), expected);
    }

    #[rstest]
    fn failure_captures_trimmed_stderr() {
        let output = CommandOutput {
            code: None,
            stdout: String::new(),
            stderr: String::from("boom\n"),
        };
        let err = CommandError::failure("docker", &output);
        assert_eq!(err.to_string(), "docker exited with status unknown: boom");
    }

    fn shell(script: &str) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(script)]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn async_run_captures_output() {
        let args = shell("printf hello; exit 3");
        let output = ProcessCommandRunner
            .run_async("sh", &args)
            .await
            .expect("sh should spawn");
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_an_async_run_kills_the_process() {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let marker = tmp.path().join("finished");
        let args = shell(&format!("sleep 1; touch '{}'", marker.display()));

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            ProcessCommandRunner.run_async("sh", &args),
        )
        .await;
        assert!(outcome.is_err(), "command should outlive the timeout");

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "killed command must not finish its work");
    }
}

//! External tool invocation.
//!
//! Every elastix and transformix call goes through [`ToolRunner`], so the
//! registration logic can be exercised against a fake runner in tests while
//! [`ProcessRunner`] handles real child processes.

use crate::{RegistrationError, RegistrationResult};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// The external programs this crate drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Elastix,
    Transformix,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tool::Elastix => write!(f, "elastix"),
            Tool::Transformix => write!(f, "transformix"),
        }
    }
}

/// A fully specified command line.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(tool: Tool, program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            tool,
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends a flag followed by its value, e.g. `-out <dir>`.
    pub fn flag(self, flag: &str, value: impl AsRef<OsStr>) -> Self {
        self.arg(flag).arg(value)
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (OsString, OsString)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Value following `flag` in the argument list.
    pub fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    /// Human-readable command line for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit status and captured output of a finished tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external tools.
///
/// `run` reports a process that started and exited as `Ok`, whatever its exit
/// code; failing to start and exceeding the timeout are errors.
pub trait ToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> RegistrationResult<ToolOutput>;

    /// Like [`run`](Self::run), but a non-zero exit code is an error.
    fn run_checked(&self, invocation: &ToolInvocation) -> RegistrationResult<ToolOutput> {
        let output = self.run(invocation)?;
        if !output.success() {
            return Err(RegistrationError::ToolFailed {
                tool: invocation.tool,
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl<R: ToolRunner + ?Sized> ToolRunner for &R {
    fn run(&self, invocation: &ToolInvocation) -> RegistrationResult<ToolOutput> {
        (**self).run(invocation)
    }
}

/// [`ToolRunner`] backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    poll_interval: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation) -> RegistrationResult<ToolOutput> {
        let tool = invocation.tool;
        tracing::debug!("{tool} command: {}", invocation.command_line());

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RegistrationError::Spawn { tool, source })?;

        // Both pipes are drained while the child runs.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= invocation.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::error!(
                        "{tool} killed after exceeding {}s timeout",
                        invocation.timeout.as_secs()
                    );
                    return Err(RegistrationError::Timeout {
                        tool,
                        timeout_secs: invocation.timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(source) => return Err(RegistrationError::Spawn { tool, source }),
            }
        };

        let output = ToolOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        tracing::debug!(
            "{tool} exited with {} after {:.1}s",
            output.exit_code,
            started.elapsed().as_secs_f64()
        );
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> ToolInvocation {
        ToolInvocation::new(Tool::Elastix, "/bin/sh", timeout)
            .arg("-c")
            .arg(script)
    }

    #[test]
    fn captures_output_and_exit_code() {
        let runner = ProcessRunner::new();
        let inv = shell("echo registered; echo warning >&2; exit 3", Duration::from_secs(10));

        let output = runner.run(&inv).unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "registered");
        assert_eq!(output.stderr.trim(), "warning");

        match runner.run_checked(&inv) {
            Err(RegistrationError::ToolFailed {
                tool,
                exit_code,
                stderr,
            }) => {
                assert_eq!(tool, Tool::Elastix);
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "warning");
            }
            other => panic!("expected ToolFailed, got {other:?}"),
        }
    }

    #[test]
    fn passes_environment_to_child() {
        let inv = shell("echo \"$MRIREG_TEST_LIB\"", Duration::from_secs(10))
            .envs([("MRIREG_TEST_LIB".into(), "/opt/elastix/lib".into())]);
        let output = ProcessRunner::new().run_checked(&inv).unwrap();
        assert_eq!(output.stdout.trim(), "/opt/elastix/lib");
    }

    #[test]
    fn kills_child_after_timeout() {
        let inv = shell("sleep 5", Duration::from_millis(200));
        let started = Instant::now();
        let err = ProcessRunner::new().run(&inv).unwrap_err();
        assert!(matches!(err, RegistrationError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let inv = ToolInvocation::new(
            Tool::Transformix,
            "/nonexistent/bin/transformix",
            Duration::from_secs(1),
        );
        let err = ProcessRunner::new().run(&inv).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Spawn {
                tool: Tool::Transformix,
                ..
            }
        ));
        assert_eq!(err.failure_kind(), crate::FailureKind::SubprocessError);
    }

    #[test]
    fn flag_values_and_command_line() {
        let inv = ToolInvocation::new(Tool::Elastix, "elastix", Duration::from_secs(1))
            .flag("-f", "t2w.nii.gz")
            .flag("-m", "adc.nii.gz");
        assert_eq!(inv.flag_value("-m"), Some(OsStr::new("adc.nii.gz")));
        assert_eq!(inv.flag_value("-out"), None);
        assert_eq!(inv.command_line(), "elastix -f t2w.nii.gz -m adc.nii.gz");
    }
}

//! External command invocation.
//!
//! Every opaque collaborator the pipeline drives (git, the environment shell,
//! package-manager commands, PowerShell signing, archive tools) is reached
//! through [`CommandExecutor`], so tests can substitute stubs and the working
//! directory and environment of each invocation are always explicit.

use crate::error::{ForgeError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use std::process::{Command, Output};

/// A fully described external process invocation.
///
/// # Examples
///
/// ```
/// use probe_forge::exec::Invocation;
///
/// let invocation = Invocation::new("git")
///     .args(["clone", "--depth", "1"])
///     .env("GIT_TERMINAL_PROMPT", "0");
/// assert_eq!(invocation.command_line(), "git clone --depth 1");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program to run.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory; inherits the caller's when `None`.
    pub cwd: Option<Utf8PathBuf>,
    /// Environment variables set for this invocation only.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Create an invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set several environment variables.
    #[must_use]
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.env.extend(vars.into_iter().cloned());
        self
    }

    /// Render the program and arguments for logs and error messages.
    ///
    /// Arguments containing whitespace are double-quoted.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.chars().any(char::is_whitespace) {
                    format!("\"{part}\"")
                } else {
                    part.to_owned()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Return the value this invocation sets for `key`, if any.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Return the working directory, if one was set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Utf8Path> {
        self.cwd.as_deref()
    }
}

/// Abstraction for running external commands.
pub trait CommandExecutor {
    /// Runs the invocation to completion and returns the captured output.
    ///
    /// # Errors
    ///
    /// Returns any I/O errors encountered while spawning or running the command.
    fn run(&self, invocation: &Invocation) -> Result<Output>;
}

/// Executes commands on the host system.
///
/// # Examples
///
/// ```no_run
/// use probe_forge::exec::{CommandExecutor, Invocation, SystemCommandExecutor};
///
/// let executor = SystemCommandExecutor;
/// let output = executor.run(&Invocation::new("git").arg("--version"))?;
/// assert!(output.status.success());
/// # Ok::<(), probe_forge::error::ForgeError>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandExecutor;

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        debug!("running {}", invocation.command_line());
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir.as_std_path());
        }
        cmd.envs(
            invocation
                .env
                .iter()
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );
        cmd.output().map_err(ForgeError::from)
    }
}

/// Run `invocation` and convert a non-zero exit into [`ForgeError::Build`].
///
/// # Errors
///
/// Returns spawn failures unchanged and `ForgeError::Build` when the process
/// exits unsuccessfully.
pub fn run_checked(executor: &dyn CommandExecutor, invocation: &Invocation) -> Result<Output> {
    let output = executor.run(invocation)?;
    if output.status.success() {
        return Ok(output);
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        log::error!("{}: {}", invocation.program, stderr.trim());
    }
    Err(ForgeError::Build {
        exit_code: output.status.code(),
        command_line: invocation.command_line(),
    })
}

/// Concatenate stdout and stderr as lossy UTF-8.
///
/// Several tools print their version banner on stderr, so probes look at
/// both streams.
#[must_use]
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

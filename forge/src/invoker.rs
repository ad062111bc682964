//! Build environment bootstrap and tool builds.
//!
//! Every command runs through the environment's login shell
//! (`<env_root>/usr/bin/bash -lc <command>`). The shell's fixed variables
//! travel in a [`ShellEnvironment`] value attached to each invocation; the
//! forge's own process environment is never modified.

use crate::config::{BuildType, ToolBuild};
use crate::error::Result;
use crate::exec::{CommandExecutor, Invocation, run_checked};
use crate::gate::{StageOutcome, run_gated};
use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info};
use std::fmt;

/// The environment shell and the variables it always needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellEnvironment {
    root: Utf8PathBuf,
    msystem: &'static str,
}

impl ShellEnvironment {
    /// Describe the environment extracted at `root`, using the given
    /// `MSYSTEM` flavour (`MINGW64` or `MINGW32`).
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>, msystem: &'static str) -> Self {
        Self {
            root: root.into(),
            msystem,
        }
    }

    /// Root of the environment tree.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Path of the login shell.
    #[must_use]
    pub fn shell(&self) -> Utf8PathBuf {
        let name = if cfg!(windows) { "bash.exe" } else { "bash" };
        self.root.join("usr").join("bin").join(name)
    }

    /// Variables set on every shell invocation.
    ///
    /// `CHERE_INVOKING` keeps the login shell in the requested working
    /// directory; `MSYSTEM` selects the toolchain flavour.
    #[must_use]
    pub fn overrides(&self) -> Vec<(String, String)> {
        vec![
            ("CHERE_INVOKING".to_owned(), "1".to_owned()),
            ("MSYSTEM".to_owned(), self.msystem.to_owned()),
        ]
    }
}

/// One step of environment provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    /// First login; lets the environment initialise itself.
    SanityCheck,
    /// Core package update.
    CoreUpdate,
    /// Update of the remaining packages.
    NormalUpdate,
    /// Base toolchain packages.
    BasePackages,
    /// Architecture-specific packages.
    ArchPackages,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SanityCheck => "environment check",
            Self::CoreUpdate => "core update",
            Self::NormalUpdate => "package update",
            Self::BasePackages => "base packages",
            Self::ArchPackages => "architecture packages",
        })
    }
}

/// Build the ordered bootstrap command lines.
///
/// An install stage whose package list is empty is left out, since
/// `pacman -S` without targets fails.
///
/// # Examples
///
/// ```
/// use probe_forge::invoker::{BootstrapStage, bootstrap_stages};
///
/// let stages = bootstrap_stages(&["git".to_owned()], "x86_64", &["libusb".to_owned()]);
/// assert_eq!(stages.len(), 5);
/// assert_eq!(
///     stages[4],
///     (
///         BootstrapStage::ArchPackages,
///         "pacman --noconfirm --needed -S mingw-w64-x86_64-libusb".to_owned()
///     )
/// );
/// ```
#[must_use]
pub fn bootstrap_stages(
    base_packages: &[String],
    mingw_arch: &str,
    arch_packages: &[String],
) -> Vec<(BootstrapStage, String)> {
    let mut stages = vec![
        (BootstrapStage::SanityCheck, "true".to_owned()),
        (BootstrapStage::CoreUpdate, "pacman --noconfirm -Syuu".to_owned()),
        (BootstrapStage::NormalUpdate, "pacman --noconfirm -Syuu".to_owned()),
    ];
    if !base_packages.is_empty() {
        stages.push((BootstrapStage::BasePackages, install_command(base_packages.iter())));
    }
    if !arch_packages.is_empty() {
        let arch = arch_packages
            .iter()
            .map(|pkg| format!("mingw-w64-{mingw_arch}-{pkg}"));
        stages.push((BootstrapStage::ArchPackages, install_command(arch)));
    }
    stages
}

fn install_command<S: AsRef<str>>(packages: impl Iterator<Item = S>) -> String {
    packages.fold("pacman --noconfirm --needed -S".to_owned(), |mut command, pkg| {
        command.push(' ');
        command.push_str(pkg.as_ref());
        command
    })
}

/// Runs commands inside the build environment.
pub struct BuildInvoker<'a> {
    shell: ShellEnvironment,
    executor: &'a dyn CommandExecutor,
}

impl<'a> BuildInvoker<'a> {
    /// Create an invoker for `shell`.
    #[must_use]
    pub fn new(shell: ShellEnvironment, executor: &'a dyn CommandExecutor) -> Self {
        Self { shell, executor }
    }

    /// Run `command_line` through the login shell in `working_directory`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ForgeError::Build`] when the command exits
    /// unsuccessfully.
    pub fn run(
        &self,
        command_line: &str,
        working_directory: &Utf8Path,
        env_overrides: &[(String, String)],
    ) -> Result<()> {
        let invocation = Invocation::new(self.shell.shell().as_str())
            .args(["-lc", command_line])
            .current_dir(working_directory)
            .envs(&self.shell.overrides())
            .envs(env_overrides);
        let output = run_checked(self.executor, &invocation)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{}", stdout.trim_end());
        }
        Ok(())
    }

    /// Provision the environment with its package updates and packages.
    ///
    /// # Errors
    ///
    /// Stops at the first failing stage and returns its error.
    pub fn bootstrap(
        &self,
        base_packages: &[String],
        mingw_arch: &str,
        arch_packages: &[String],
    ) -> Result<()> {
        for (stage, command) in bootstrap_stages(base_packages, mingw_arch, arch_packages) {
            info!("bootstrap: {stage}");
            self.run(&command, self.shell.root(), &[])?;
        }
        Ok(())
    }

    /// Build one tool in `checkout` unless `build/<install_dir>` exists.
    ///
    /// The script receives `INSTALL_DIR` and `BUILD_TYPE`.
    ///
    /// # Errors
    ///
    /// Returns the script's failure.
    pub fn build_tool(
        &self,
        build: &ToolBuild,
        checkout: &Utf8Path,
        install_dir: &Utf8Path,
        build_type: BuildType,
    ) -> Result<StageOutcome> {
        let overrides = [
            ("INSTALL_DIR".to_owned(), install_dir.to_string()),
            ("BUILD_TYPE".to_owned(), build_type.as_str().to_owned()),
        ];
        run_gated(&build.name, install_dir, || {
            self.run(&build.script, checkout, &overrides)
        })
    }
}

//! Shallow git clones of repository descriptors.

use crate::error::{ForgeError, Result};
use crate::exec::{CommandExecutor, Invocation};
use camino::Utf8Path;
use log::info;

/// Clone `href` at `tree` into `target` with depth one, leaving a detached
/// checkout. Any existing directory at `target` is removed first.
///
/// # Errors
///
/// Returns [`ForgeError::Git`] naming the failed operation when git exits
/// unsuccessfully, and I/O errors from clearing or preparing `target`.
pub fn shallow_clone(
    executor: &dyn CommandExecutor,
    href: &str,
    tree: &str,
    target: &Utf8Path,
    submodules: bool,
) -> Result<()> {
    if target.exists() {
        std::fs::remove_dir_all(target)?;
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    info!("cloning {href} ({tree}) into {target}");
    run_git(
        executor,
        "clone",
        Invocation::new("git").args([
            "clone",
            "--depth",
            "1",
            "--single-branch",
            "--branch",
            tree,
            href,
            target.as_str(),
        ]),
    )?;
    run_git(
        executor,
        "checkout",
        Invocation::new("git").args(["-C", target.as_str(), "checkout", "--detach"]),
    )?;
    if submodules {
        run_git(
            executor,
            "submodule update",
            Invocation::new("git").args([
                "-C",
                target.as_str(),
                "submodule",
                "update",
                "--init",
                "--recursive",
                "--depth",
                "1",
            ]),
        )?;
    }
    Ok(())
}

/// Report whether `target` holds a git checkout.
///
/// # Errors
///
/// Returns an error only if git cannot be started.
pub fn checkout_exists(executor: &dyn CommandExecutor, target: &Utf8Path) -> Result<bool> {
    if !target.is_dir() {
        return Ok(false);
    }
    let output = executor.run(
        &Invocation::new("git").args(["-C", target.as_str(), "rev-parse", "--git-dir"]),
    )?;
    Ok(output.status.success())
}

fn run_git(
    executor: &dyn CommandExecutor,
    operation: &'static str,
    invocation: Invocation,
) -> Result<()> {
    let output = executor.run(&invocation)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ForgeError::Git {
            operation,
            message: stderr.trim().to_owned(),
        });
    }
    Ok(())
}

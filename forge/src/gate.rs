//! Sentinel-based stage skipping.
//!
//! A stage is considered done when its sentinel path exists. There are no
//! timestamps or content hashes; deleting the sentinel is the only way to
//! force a stage to run again.

use crate::error::Result;
use camino::Utf8Path;
use log::{info, warn};

/// Whether a gated stage ran or was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage's action ran.
    Ran,
    /// The sentinel existed, so the action did not run.
    Skipped,
}

/// Return `true` when the stage guarded by `sentinel` still has to run.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use probe_forge::gate::should_run;
///
/// assert!(should_run(Utf8Path::new("/nonexistent/install")));
/// ```
#[must_use]
pub fn should_run(sentinel: &Utf8Path) -> bool {
    !sentinel.exists()
}

/// Run `action` unless `sentinel` exists.
///
/// A successful action that does not create the sentinel is logged, since
/// the stage will run again next time.
///
/// # Errors
///
/// Propagates the error returned by `action`.
pub fn run_gated(
    stage: &str,
    sentinel: &Utf8Path,
    action: impl FnOnce() -> Result<()>,
) -> Result<StageOutcome> {
    if !should_run(sentinel) {
        info!("{stage}: {sentinel} exists, skipping");
        return Ok(StageOutcome::Skipped);
    }
    info!("{stage}: running");
    action()?;
    if should_run(sentinel) {
        warn!("{stage}: finished without creating {sentinel}");
    }
    Ok(StageOutcome::Ran)
}

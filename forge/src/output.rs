//! Progress output for the forge CLI.

use crate::fetch::FetchResult;
use crate::version::{VersionRecord, VersionSource};
use std::io::Write;
use std::path::Path;

/// Write one line to `stderr`, ignoring write failures.
pub fn write_stderr_line(stderr: &mut dyn Write, message: impl std::fmt::Display) {
    if writeln!(stderr, "{message}").is_err() {
        // Best-effort progress output; ignore write failures.
    }
}

/// Describe a fetched artifact.
#[must_use]
pub fn fetch_line(result: &FetchResult) -> String {
    match result {
        FetchResult::File {
            path,
            unchanged: true,
        } => format!("  up to date  {path}"),
        FetchResult::File { path, .. } => format!("  fetched     {path}"),
        FetchResult::Extracted { directory, .. } => format!("  extracted   {directory}"),
        FetchResult::Cloned { path, tree } => format!("  cloned      {path} ({tree})"),
    }
}

/// Describe an artifact's version and where it came from.
///
/// # Example
///
/// ```
/// use probe_forge::output::version_line;
/// use probe_forge::version::{VersionRecord, VersionSource};
///
/// let record = VersionRecord {
///     artifact_name: "zadig-2.9.exe".to_owned(),
///     version: Some("2.9".to_owned()),
///     source: VersionSource::FileName,
/// };
/// assert_eq!(version_line(&record), "  zadig-2.9.exe: 2.9 (file name)");
/// ```
#[must_use]
pub fn version_line(record: &VersionRecord) -> String {
    let source = match record.source {
        VersionSource::FileName => "file name",
        VersionSource::Url => "url",
        VersionSource::BinaryMetadata => "binary metadata",
        VersionSource::FallbackRaw => return format!("  {record} (unversioned)"),
    };
    format!("  {record} ({source})")
}

/// Format the closing summary of a run.
#[must_use]
pub fn success_message(archives: &[impl AsRef<Path>]) -> String {
    let plural = if archives.len() == 1 { "archive" } else { "archives" };
    let mut message = format!("Created {} {plural}", archives.len());
    for archive in archives {
        message.push_str(&format!("\n  {}", archive.as_ref().display()));
    }
    message
}

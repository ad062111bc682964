//! Version extraction for artifacts and built tools.
//!
//! Artifact versions are informational: [`resolve`] tries the file name,
//! then the URL, then the executable's embedded product version, and falls
//! back to showing the raw name. Tool versions feed archive names, so
//! [`probe_tool_version`] fails when the tool does not report one.

pub mod pe;

use crate::error::{ForgeError, Result};
use crate::exec::{CommandExecutor, Invocation, combined_output};
use crate::registry::ArtifactDescriptor;
use camino::Utf8Path;
use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

fn compile_regex(pattern: &str, context: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|error| panic!("{context}: {error}"))
}

// Each dotted component must end at a word boundary, so the `7` of a
// `.7z` extension is not taken as a version component.
static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"\d+(?:\.\d+\b)+", "version pattern should compile"));

/// Where a resolved version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSource {
    /// Matched in the descriptor's file name.
    FileName,
    /// Matched in the descriptor's URL.
    Url,
    /// Read from the downloaded executable's version resource.
    BinaryMetadata,
    /// Nothing matched; only the raw name is shown.
    FallbackRaw,
}

/// The displayed version of one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// Displayed artifact name: the file name when present.
    pub artifact_name: String,
    /// The version, if any source produced one.
    pub version: Option<String>,
    /// Which source produced it.
    pub source: VersionSource,
}

impl fmt::Display for VersionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}: {version}", self.artifact_name),
            None => f.write_str(&self.artifact_name),
        }
    }
}

/// Return the first dotted numeric version in `text`.
///
/// # Examples
///
/// ```
/// use probe_forge::version::find_version;
///
/// assert_eq!(find_version("zadig-2.9.exe"), Some("2.9"));
/// assert_eq!(find_version("hidapi-win.zip"), None);
/// ```
#[must_use]
pub fn find_version(text: &str) -> Option<&str> {
    VERSION_PATTERN.find(text).map(|m| m.as_str())
}

/// Cut `version` at its first `-`, dropping pre-release and build suffixes.
///
/// # Examples
///
/// ```
/// use probe_forge::version::truncate_prerelease;
///
/// assert_eq!(truncate_prerelease("0.12.0-rc"), "0.12.0");
/// assert_eq!(truncate_prerelease("1.4"), "1.4");
/// ```
#[must_use]
pub fn truncate_prerelease(version: &str) -> &str {
    version.split_once('-').map_or(version, |(head, _)| head)
}

/// Determine the displayed version of `descriptor`.
///
/// `local_path` is where the fetched artifact lives; it is only read when
/// neither the file name nor the URL carries a version.
#[must_use]
pub fn resolve(descriptor: &ArtifactDescriptor, local_path: Option<&Path>) -> VersionRecord {
    let artifact_name = descriptor.display_name().to_owned();
    let candidates = [
        (
            descriptor.file.as_deref().and_then(find_version).map(str::to_owned),
            VersionSource::FileName,
        ),
        (
            find_version(&descriptor.href).map(str::to_owned),
            VersionSource::Url,
        ),
    ];
    if let Some((version, source)) = candidates
        .into_iter()
        .find_map(|(version, source)| version.map(|v| (v, source)))
    {
        return VersionRecord {
            artifact_name,
            version: Some(version),
            source,
        };
    }

    match local_path.and_then(pe::product_version) {
        Some(version) => VersionRecord {
            artifact_name,
            version: Some(version),
            source: VersionSource::BinaryMetadata,
        },
        None => VersionRecord {
            artifact_name,
            version: None,
            source: VersionSource::FallbackRaw,
        },
    }
}

/// Run a built tool and extract its version from what it prints.
///
/// `pattern` must contain a capture group; the first group's text is the
/// version. Both stdout and stderr are searched, and the exit status is
/// ignored since some tools exit non-zero after printing their banner.
///
/// # Errors
///
/// Returns [`ForgeError::VersionParse`] when the pattern is invalid or does
/// not match, and propagates spawn failures.
pub fn probe_tool_version(
    executor: &dyn CommandExecutor,
    tool: &str,
    binary: &Utf8Path,
    args: &[String],
    pattern: &str,
) -> Result<String> {
    let regex = Regex::new(pattern).map_err(|err| ForgeError::VersionParse {
        tool: tool.to_owned(),
        output: format!("invalid version pattern: {err}"),
    })?;
    let output = executor.run(&Invocation::new(binary.as_str()).args(args.iter().cloned()))?;
    let text = combined_output(&output);
    regex
        .captures(&text)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str().to_owned())
        .ok_or_else(|| ForgeError::VersionParse {
            tool: tool.to_owned(),
            output: text.trim().to_owned(),
        })
}

//! Error types for the probe-forge pipeline.
//!
//! Every stage fails fast: the first error aborts the run and is reported to
//! the operator as a single human-readable line. Stage-specific errors from
//! the download, extraction, and packaging modules are folded into
//! [`ForgeError`] so callers only handle one type.

use crate::fetch::download::DownloadError;
use crate::fetch::extraction::ExtractionError;
use crate::packaging::PackagingError;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors that can occur while running the pipeline.
#[derive(Debug, Error)]
pub enum ForgeError {
    /// A configuration or descriptor file is malformed or incomplete.
    #[error("invalid configuration {path}: {reason}")]
    Config {
        /// The file that failed to load or validate.
        path: Utf8PathBuf,
        /// Description of the problem.
        reason: String,
    },

    /// Retrieving a remote artifact failed.
    #[error("fetch failed: {0}")]
    Fetch(#[from] DownloadError),

    /// Verify-only mode found no artifact at the expected location.
    #[error("expected artifact missing at {path}; rerun without --skip-download to fetch it")]
    MissingArtifact {
        /// Where the artifact should have been.
        path: Utf8PathBuf,
    },

    /// A git clone, checkout, or submodule operation failed.
    #[error("git {operation} failed: {message}")]
    Git {
        /// The git operation that failed (clone, checkout, submodule update).
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// An archive could not be extracted.
    #[error("failed to extract {archive}: {source}")]
    Extraction {
        /// The archive being extracted.
        archive: Utf8PathBuf,
        /// The underlying extraction failure.
        #[source]
        source: ExtractionError,
    },

    /// An external build command exited unsuccessfully.
    #[error("command `{command_line}` failed with {}", describe_exit(.exit_code))]
    Build {
        /// Process exit code, or `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        /// The command line that was run.
        command_line: String,
    },

    /// No code-signing certificate matched the subject filter.
    #[error("no code-signing certificate with subject starting \"{subject_prefix}\"")]
    NoCertificate {
        /// The subject prefix used to filter certificates.
        subject_prefix: String,
    },

    /// More than one code-signing certificate matched the subject filter.
    #[error("{count} code-signing certificates match subject \"{subject_prefix}\"; expected exactly one")]
    AmbiguousCertificate {
        /// The subject prefix used to filter certificates.
        subject_prefix: String,
        /// How many certificates matched.
        count: usize,
    },

    /// A file did not report a valid signature after signing.
    #[error("signing {path} failed with status {status}")]
    Signing {
        /// The file whose signature is not valid.
        path: Utf8PathBuf,
        /// The status reported by the signing tool.
        status: String,
    },

    /// A tool's version could not be parsed from its own output.
    #[error("could not parse a version for {tool} from output: {output}")]
    VersionParse {
        /// The tool whose version was probed.
        tool: String,
        /// The probed output, trimmed.
        output: String,
    },

    /// Archive creation failed.
    #[error("packaging failed: {0}")]
    Packaging(#[from] PackagingError),

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    exit_code.map_or_else(
        || "no exit code (terminated by signal)".to_owned(),
        |code| format!("exit code {code}"),
    )
}

/// Result type alias using [`ForgeError`].
pub type Result<T> = std::result::Result<T, ForgeError>;

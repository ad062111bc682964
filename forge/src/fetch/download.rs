//! Conditional HTTP retrieval of single files.
//!
//! When the destination already exists, its modification time is sent as
//! `If-Modified-Since`; a `304 Not Modified` answer keeps the local copy.
//! Fresh bodies stream into a sibling `.part` file that is renamed over the
//! destination only once complete, so a failed transfer never leaves a
//! truncated file behind.

use chrono::{DateTime, Utc};
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

/// Network timeout covering one whole request.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// `strftime` layout of an IMF-fixdate HTTP date.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Result of a conditional transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// A new body was written to the destination.
    Downloaded,
    /// The server reported the local copy as current.
    NotModified,
}

/// Trait for retrieving a URL into a local file.
///
/// Abstractions allow tests to replace the network.
#[cfg_attr(test, mockall::automock)]
pub trait Downloader {
    /// Retrieve `url` into `dest`.
    ///
    /// When `modified_since` is set the request is conditional and may return
    /// [`DownloadOutcome::NotModified`] without touching `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails, the server answers with an
    /// unexpected status, or the file cannot be written.
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        modified_since: Option<SystemTime>,
    ) -> Result<DownloadOutcome, DownloadError>;
}

/// Errors arising from download operations.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// HTTP request failed.
    #[error("download failed for {url}: {reason}")]
    HttpError {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The requested file was not found (HTTP 404).
    #[error("not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// I/O error writing the downloaded file.
    #[error("I/O error writing download: {0}")]
    Io(#[from] io::Error),
}

/// HTTP downloader using `ureq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDownloader;

impl Downloader for HttpDownloader {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        modified_since: Option<SystemTime>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let mut request = http_agent().get(url);
        if let Some(since) = modified_since {
            let stamp = http_date(since);
            debug!("GET {url} (If-Modified-Since: {stamp})");
            request = request.header("If-Modified-Since", &stamp);
        } else {
            debug!("GET {url}");
        }

        let response = request.call().map_err(|e| map_ureq_error(url, &e))?;
        if let Some(outcome) = classify_status(url, response.status().as_u16())? {
            return Ok(outcome);
        }

        let last_modified = response
            .headers()
            .get("Last-Modified")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_date);

        let mut body = response.into_body().into_reader();
        write_atomically(&mut body, dest)?;
        if let Some(stamp) = last_modified {
            OpenOptions::new()
                .write(true)
                .open(dest)?
                .set_modified(stamp)?;
        }
        Ok(DownloadOutcome::Downloaded)
    }
}

/// Shared `ureq` agent with request timeout configuration.
///
/// Status codes are inspected by the caller, so non-2xx answers such as
/// `304` are not turned into errors by the agent.
fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(DOWNLOAD_TIMEOUT))
            .http_status_as_error(false)
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Decide what an answer's status means before any body is read.
///
/// `Ok(None)` means a body follows; `Ok(Some(_))` ends the transfer.
fn classify_status(url: &str, status: u16) -> Result<Option<DownloadOutcome>, DownloadError> {
    match status {
        200 => Ok(None),
        304 => Ok(Some(DownloadOutcome::NotModified)),
        404 => Err(DownloadError::NotFound {
            url: url.to_owned(),
        }),
        other => Err(DownloadError::HttpError {
            url: url.to_owned(),
            reason: format!("unexpected status {other}"),
        }),
    }
}

/// Map a transport-level ureq error to a [`DownloadError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> DownloadError {
    DownloadError::HttpError {
        url: url.to_owned(),
        reason: err.to_string(),
    }
}

/// Format a timestamp as an HTTP date.
///
/// # Examples
///
/// ```
/// use probe_forge::fetch::download::http_date;
/// use std::time::{Duration, SystemTime};
///
/// let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(784_111_777);
/// assert_eq!(http_date(stamp), "Sun, 06 Nov 1994 08:49:37 GMT");
/// ```
#[must_use]
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date header value.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(SystemTime::from)
}

/// Path of the in-progress file for `dest`.
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Stream `reader` into `dest` through a `.part` file.
///
/// # Errors
///
/// Returns an I/O error if reading or writing fails; the partial file is
/// removed and `dest` is left as it was.
pub fn write_atomically(reader: &mut dyn Read, dest: &Path) -> Result<(), DownloadError> {
    let part = partial_path(dest);
    let result = File::create(&part)
        .and_then(|mut file| io::copy(reader, &mut file).and_then(|_| file.sync_all()))
        .and_then(|()| fs::rename(&part, dest));
    if let Err(err) = result {
        let _ = fs::remove_file(&part);
        return Err(DownloadError::Io(err));
    }
    Ok(())
}

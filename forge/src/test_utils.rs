//! Shared test utilities for the probe-forge crate.

use crate::error::Result;
use crate::exec::{CommandExecutor, Invocation};
use crate::fetch::download::{DownloadError, DownloadOutcome, Downloader};
use crate::fetch::extraction::{ArchiveExtractor, ExtractionError};
use crate::signing::{Certificate, CertificateStore, SignatureStatus, SignatureTool};
use camino::{Utf8Path, Utf8PathBuf};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::time::SystemTime;

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code as u32)
}

/// Creates a successful command `Output` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> Output {
    Output {
        status: exit_status(0),
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

/// Creates a successful command `Output` with the given stdout.
#[must_use]
pub fn stdout_output(stdout: &str) -> Output {
    Output {
        status: exit_status(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// Represents an expected command invocation for testing.
#[derive(Debug)]
pub struct ExpectedCall {
    /// The program expected to run (e.g., "git").
    pub program: &'static str,
    /// The arguments expected to be passed.
    pub args: Vec<&'static str>,
    /// The result to return when this command is invoked.
    pub result: Result<Output>,
}

/// A strict stub implementation of `CommandExecutor`.
///
/// Expected invocations are consumed in order; any deviation in program or
/// arguments fails the test.
#[derive(Debug)]
pub struct StubExecutor {
    expected: RefCell<VecDeque<ExpectedCall>>,
    seen: RefCell<Vec<Invocation>>,
}

impl StubExecutor {
    /// Creates a new `StubExecutor` with the given expected calls.
    #[must_use]
    pub fn new(expected: Vec<ExpectedCall>) -> Self {
        Self {
            expected: RefCell::new(expected.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    /// Returns every invocation received so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.seen.borrow().clone()
    }

    /// Asserts that all expected command invocations have been consumed.
    ///
    /// # Panics
    ///
    /// Panics if there are remaining expected calls that were not invoked.
    pub fn assert_finished(&self) {
        assert!(
            self.expected.borrow().is_empty(),
            "expected no further command invocations"
        );
    }
}

impl CommandExecutor for StubExecutor {
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        self.seen.borrow_mut().push(invocation.clone());
        let mut expected = self.expected.borrow_mut();
        let call = expected
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected command invocation: {}", invocation.command_line()));

        assert_eq!(call.program, invocation.program);
        assert_eq!(call.args.as_slice(), invocation.args.as_slice());

        call.result
    }
}

type Responder = Box<dyn Fn(&Invocation) -> Output>;

/// A permissive `CommandExecutor` that records every invocation.
///
/// Each call is answered by a responder closure, which may also create files
/// to simulate side effects of the real command (for example a build script
/// populating its install directory).
pub struct RecordingExecutor {
    responder: Responder,
    seen: RefCell<Vec<Invocation>>,
}

impl RecordingExecutor {
    /// An executor where every command succeeds with empty output.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_responder(|_| success_output())
    }

    /// An executor answering each invocation with `responder`.
    #[must_use]
    pub fn with_responder(responder: impl Fn(&Invocation) -> Output + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            seen: RefCell::new(Vec::new()),
        }
    }

    /// Returns every invocation received so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.seen.borrow().clone()
    }

    /// Counts invocations matching `predicate`.
    #[must_use]
    pub fn count_matching(&self, predicate: impl Fn(&Invocation) -> bool) -> usize {
        self.seen.borrow().iter().filter(|inv| predicate(inv)).count()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn run(&self, invocation: &Invocation) -> Result<Output> {
        self.seen.borrow_mut().push(invocation.clone());
        Ok((self.responder)(invocation))
    }
}

/// A `Downloader` that writes a fixed body instead of using the network.
///
/// When `honour_conditional` is set, requests carrying a modification time
/// are answered with `NotModified`, as a server would for an unchanged file.
#[derive(Debug, Default)]
pub struct StubDownloader {
    body: Vec<u8>,
    honour_conditional: bool,
    calls: Cell<usize>,
    urls: RefCell<Vec<String>>,
}

impl StubDownloader {
    /// A downloader that always transfers `body`.
    #[must_use]
    pub fn new(body: &[u8]) -> Self {
        Self {
            body: body.to_vec(),
            ..Self::default()
        }
    }

    /// A downloader that reports `NotModified` for conditional requests.
    #[must_use]
    pub fn conditional(body: &[u8]) -> Self {
        Self {
            honour_conditional: true,
            ..Self::new(body)
        }
    }

    /// Number of transfers requested so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// URLs requested so far.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.urls.borrow().clone()
    }
}

impl Downloader for StubDownloader {
    fn fetch(
        &self,
        url: &str,
        dest: &Path,
        modified_since: Option<SystemTime>,
    ) -> std::result::Result<DownloadOutcome, DownloadError> {
        self.calls.set(self.calls.get() + 1);
        self.urls.borrow_mut().push(url.to_owned());
        if self.honour_conditional && modified_since.is_some() {
            return Ok(DownloadOutcome::NotModified);
        }
        std::fs::write(dest, &self.body)?;
        Ok(DownloadOutcome::Downloaded)
    }
}

/// An `ArchiveExtractor` that writes one marker file per extraction.
#[derive(Debug, Default)]
pub struct StubExtractor {
    calls: Cell<usize>,
}

impl StubExtractor {
    /// Name of the marker file written into each destination.
    pub const MARKER: &'static str = "extracted.txt";

    /// Number of extractions performed so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl ArchiveExtractor for StubExtractor {
    fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        _strip: usize,
    ) -> std::result::Result<usize, ExtractionError> {
        self.calls.set(self.calls.get() + 1);
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join(Self::MARKER), archive.display().to_string())?;
        Ok(1)
    }
}

/// A certificate store and signing tool answering from memory.
#[derive(Debug, Default)]
pub struct StaticSigning {
    certificates: Vec<Certificate>,
    signed: RefCell<Vec<Utf8PathBuf>>,
}

impl StaticSigning {
    /// A store holding `certificates`; every signature comes back valid.
    #[must_use]
    pub fn new(certificates: Vec<Certificate>) -> Self {
        Self {
            certificates,
            signed: RefCell::new(Vec::new()),
        }
    }

    /// Files signed so far.
    #[must_use]
    pub fn signed(&self) -> Vec<Utf8PathBuf> {
        self.signed.borrow().clone()
    }
}

impl CertificateStore for StaticSigning {
    fn code_signing_certificates(&self) -> Result<Vec<Certificate>> {
        Ok(self.certificates.clone())
    }
}

impl SignatureTool for StaticSigning {
    fn sign(&self, path: &Utf8Path, _certificate: &Certificate) -> Result<SignatureStatus> {
        self.signed.borrow_mut().push(path.to_owned());
        Ok(SignatureStatus::Valid)
    }
}

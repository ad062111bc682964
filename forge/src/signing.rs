//! Code signing of build outputs.
//!
//! The [`Signer`] picks exactly one code-signing certificate whose subject
//! starts with a configured prefix, signs every requested file, and then
//! checks the reported statuses in order. Files signed before a failure are
//! left signed.
//!
//! The default store and tool go through PowerShell
//! (`Cert:\CurrentUser\My` and `Set-AuthenticodeSignature`).

use crate::error::{ForgeError, Result};
use crate::exec::{CommandExecutor, Invocation, run_checked};
use camino::{Utf8Path, Utf8PathBuf};
use log::{info, warn};
use std::fmt;

/// Subject prefix used when the configuration names none.
pub const DEFAULT_SUBJECT_PREFIX: &str = "CN=Open Source Developer";

/// Timestamp authority countersigning every signature.
pub const TIMESTAMP_URL: &str = "http://timestamp.digicert.com";

/// Digest algorithm for signatures.
pub const HASH_ALGORITHM: &str = "SHA256";

/// A code-signing certificate in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Hex thumbprint identifying the certificate.
    pub thumbprint: String,
    /// Distinguished subject name.
    pub subject: String,
}

/// Signature state reported for a file after signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    /// The file carries a valid signature.
    Valid,
    /// Any other status, as reported by the tool.
    Invalid(String),
}

impl SignatureStatus {
    /// Interpret a status word printed by the signing tool.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            "Valid" => Self::Valid,
            other => Self::Invalid(other.to_owned()),
        }
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("Valid"),
            Self::Invalid(status) if status.is_empty() => f.write_str("<no status>"),
            Self::Invalid(status) => f.write_str(status),
        }
    }
}

/// Lists the code-signing certificates available to the current user.
#[cfg_attr(test, mockall::automock)]
pub trait CertificateStore {
    /// Return every code-signing certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn code_signing_certificates(&self) -> Result<Vec<Certificate>>;
}

/// Applies a signature to one file.
#[cfg_attr(test, mockall::automock)]
pub trait SignatureTool {
    /// Sign `path` with `certificate` and report the resulting status.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool cannot be run.
    fn sign(&self, path: &Utf8Path, certificate: &Certificate) -> Result<SignatureStatus>;
}

/// Certificate store and signing tool backed by PowerShell.
pub struct PowerShellSigning<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> PowerShellSigning<'a> {
    /// Create a PowerShell-backed store and tool.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    fn powershell(&self, script: &str) -> Result<String> {
        let invocation = Invocation::new("powershell").args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            script,
        ]);
        let output = run_checked(self.executor, &invocation)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl CertificateStore for PowerShellSigning<'_> {
    fn code_signing_certificates(&self) -> Result<Vec<Certificate>> {
        let listing = self.powershell(
            r#"Get-ChildItem -Path Cert:\CurrentUser\My -CodeSigningCert | ForEach-Object { "$($_.Thumbprint)|$($_.Subject)" }"#,
        )?;
        Ok(parse_certificate_listing(&listing))
    }
}

impl SignatureTool for PowerShellSigning<'_> {
    fn sign(&self, path: &Utf8Path, certificate: &Certificate) -> Result<SignatureStatus> {
        let script = format!(
            "(Set-AuthenticodeSignature -FilePath {} -Certificate (Get-Item -Path {}) -TimestampServer {} -HashAlgorithm {HASH_ALGORITHM}).Status",
            quote(path.as_str()),
            quote(&format!(r"Cert:\CurrentUser\My\{}", certificate.thumbprint)),
            quote(TIMESTAMP_URL),
        );
        Ok(SignatureStatus::parse(&self.powershell(&script)?))
    }
}

/// Parse `thumbprint|subject` lines.
#[must_use]
pub fn parse_certificate_listing(listing: &str) -> Vec<Certificate> {
    listing
        .lines()
        .filter_map(|line| line.trim().split_once('|'))
        .map(|(thumbprint, subject)| Certificate {
            thumbprint: thumbprint.trim().to_owned(),
            subject: subject.trim().to_owned(),
        })
        .filter(|cert| !cert.thumbprint.is_empty())
        .collect()
}

/// Pick the single certificate whose subject starts with `subject_prefix`.
///
/// # Errors
///
/// Returns [`ForgeError::NoCertificate`] when none matches and
/// [`ForgeError::AmbiguousCertificate`] when several do.
pub fn select_certificate(
    certificates: Vec<Certificate>,
    subject_prefix: &str,
) -> Result<Certificate> {
    let mut matching: Vec<Certificate> = certificates
        .into_iter()
        .filter(|cert| cert.subject.starts_with(subject_prefix))
        .collect();
    match matching.len() {
        0 => Err(ForgeError::NoCertificate {
            subject_prefix: subject_prefix.to_owned(),
        }),
        1 => matching.pop().ok_or_else(|| ForgeError::NoCertificate {
            subject_prefix: subject_prefix.to_owned(),
        }),
        count => Err(ForgeError::AmbiguousCertificate {
            subject_prefix: subject_prefix.to_owned(),
            count,
        }),
    }
}

/// Whether signing happens, and with which certificate filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningPolicy {
    /// Sign with the certificate whose subject starts with this prefix.
    Enabled {
        /// Certificate subject prefix.
        subject_prefix: String,
    },
    /// Leave files untouched.
    Disabled,
}

/// What a call to [`Signer::sign`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningOutcome {
    /// Signing is disabled; nothing was touched.
    Skipped,
    /// This many files were signed and verified.
    Signed(usize),
}

/// Signs build outputs according to a [`SigningPolicy`].
pub struct Signer<'a> {
    policy: SigningPolicy,
    store: &'a dyn CertificateStore,
    tool: &'a dyn SignatureTool,
}

impl<'a> Signer<'a> {
    /// Create a signer.
    #[must_use]
    pub fn new(
        policy: SigningPolicy,
        store: &'a dyn CertificateStore,
        tool: &'a dyn SignatureTool,
    ) -> Self {
        Self {
            policy,
            store,
            tool,
        }
    }

    /// Sign every file in `paths`, then check each status in order.
    ///
    /// # Errors
    ///
    /// Returns certificate selection errors before anything is signed, and
    /// [`ForgeError::Signing`] for the first file whose status is not valid.
    pub fn sign(&self, paths: &[Utf8PathBuf]) -> Result<SigningOutcome> {
        let SigningPolicy::Enabled { subject_prefix } = &self.policy else {
            let names: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
            warn!("signing disabled; leaving unsigned: {}", names.join(", "));
            return Ok(SigningOutcome::Skipped);
        };

        let certificate =
            select_certificate(self.store.code_signing_certificates()?, subject_prefix)?;
        info!("signing with {} ({})", certificate.subject, certificate.thumbprint);

        let mut statuses = Vec::with_capacity(paths.len());
        for path in paths {
            statuses.push((path, self.tool.sign(path, &certificate)?));
        }
        for (path, status) in statuses {
            if status != SignatureStatus::Valid {
                return Err(ForgeError::Signing {
                    path: path.clone(),
                    status: status.to_string(),
                });
            }
        }
        Ok(SigningOutcome::Signed(paths.len()))
    }
}

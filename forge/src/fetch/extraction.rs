//! Archive extraction with leading-component stripping.
//!
//! `.zip`, `.tar.gz` and `.tar.zst` archives are unpacked in-process; any
//! other format is handed to the system `tar`. Every in-process entry is
//! checked so nothing lands outside the destination directory: entry paths
//! and link targets may not be absolute or climb with `..`, and hard-link
//! targets are stripped and resolved below the destination like any entry.

use crate::exec::{CommandExecutor, Invocation};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Trait for extracting archives, enabling test mocking.
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor {
    /// Extract `archive` into `dest`, dropping `strip` leading path components
    /// from every entry.
    ///
    /// Returns the number of files written.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::PathTraversal`] if any entry attempts to
    /// escape `dest`, [`ExtractionError::EmptyArchive`] if nothing remains
    /// after stripping, and I/O or tool errors otherwise.
    fn extract(&self, archive: &Path, dest: &Path, strip: usize) -> Result<usize, ExtractionError>;
}

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error during extraction.
    #[error("extraction I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path in the archive attempts to traverse outside the destination.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path from the archive entry.
        path: String,
    },

    /// The archive contains no files.
    #[error("archive contains no files")]
    EmptyArchive,

    /// The zip container is malformed.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The external `tar` failed.
    #[error("external tar failed: {message}")]
    External {
        /// Description of the failure.
        message: String,
    },
}

/// Container format, decided by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.zip`
    Zip,
    /// `.tar.gz` or `.tgz`
    TarGz,
    /// `.tar.zst` or `.tzst`
    TarZst,
    /// Anything else; extracted by the system `tar`.
    External,
}

impl ArchiveFormat {
    /// Detect the format from the archive's file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use probe_forge::fetch::extraction::ArchiveFormat;
    /// use std::path::Path;
    ///
    /// assert_eq!(ArchiveFormat::detect(Path::new("msys2.tar.zst")), ArchiveFormat::TarZst);
    /// assert_eq!(ArchiveFormat::detect(Path::new("x.tar.xz")), ArchiveFormat::External);
    /// ```
    #[must_use]
    pub fn detect(archive: &Path) -> Self {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            Self::Zip
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Self::TarZst
        } else {
            Self::External
        }
    }
}

/// Default extractor: in-process for common formats, system `tar` otherwise.
pub struct NativeExtractor<'a> {
    executor: &'a dyn CommandExecutor,
}

impl<'a> NativeExtractor<'a> {
    /// Create an extractor that falls back to `executor` for other formats.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor) -> Self {
        Self { executor }
    }

    fn extract_external(
        &self,
        archive: &Path,
        dest: &Path,
        strip: usize,
    ) -> Result<usize, ExtractionError> {
        let invocation = Invocation::new("tar")
            .arg("-xf")
            .arg(archive.to_string_lossy())
            .arg("-C")
            .arg(dest.to_string_lossy())
            .arg(format!("--strip-components={strip}"));
        let output = self
            .executor
            .run(&invocation)
            .map_err(|err| ExtractionError::External {
                message: err.to_string(),
            })?;
        if !output.status.success() {
            return Err(ExtractionError::External {
                message: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let count = count_files(dest)?;
        if count == 0 {
            return Err(ExtractionError::EmptyArchive);
        }
        Ok(count)
    }
}

impl ArchiveExtractor for NativeExtractor<'_> {
    fn extract(&self, archive: &Path, dest: &Path, strip: usize) -> Result<usize, ExtractionError> {
        let count = match ArchiveFormat::detect(archive) {
            ArchiveFormat::Zip => extract_zip(archive, dest, strip)?,
            ArchiveFormat::TarGz => {
                extract_tar(flate2::read::GzDecoder::new(File::open(archive)?), dest, strip)?
            }
            ArchiveFormat::TarZst => {
                extract_tar(zstd::Decoder::new(File::open(archive)?)?, dest, strip)?
            }
            ArchiveFormat::External => return self.extract_external(archive, dest, strip),
        };
        if count == 0 {
            return Err(ExtractionError::EmptyArchive);
        }
        Ok(count)
    }
}

fn extract_tar(reader: impl Read, dest: &Path, strip: usize) -> Result<usize, ExtractionError> {
    let mut archive = tar::Archive::new(reader);
    let mut files = 0;
    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_path = entry.path()?.into_owned();
        validate_entry_path(&entry_path)?;
        let Some(relative) = strip_components(&entry_path, strip) else {
            continue;
        };

        let dest_path = dest.join(&relative);
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entry_type = entry.header().entry_type();
        match entry_type {
            tar::EntryType::Link => {
                let target = hard_link_target(&entry, dest, strip)?;
                replace_with_hard_link(&target, &dest_path)?;
            }
            tar::EntryType::Symlink => {
                validate_symlink_target(&entry)?;
                entry.unpack(&dest_path)?;
            }
            _ => {
                entry.unpack(&dest_path)?;
            }
        }
        if !entry_type.is_dir() {
            files += 1;
        }
    }
    Ok(files)
}

fn link_name<R: Read>(entry: &tar::Entry<'_, R>) -> Result<PathBuf, ExtractionError> {
    entry
        .link_name()?
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| ExtractionError::PathTraversal {
            path: entry.path_bytes().escape_ascii().to_string(),
        })
}

/// Resolve a hard link's target the way its own path was resolved: stripped,
/// then placed below `dest`.
fn hard_link_target<R: Read>(
    entry: &tar::Entry<'_, R>,
    dest: &Path,
    strip: usize,
) -> Result<PathBuf, ExtractionError> {
    let target = link_name(entry)?;
    validate_entry_path(&target)?;
    let relative =
        strip_components(&target, strip).ok_or_else(|| ExtractionError::PathTraversal {
            path: target.display().to_string(),
        })?;
    Ok(dest.join(relative))
}

fn replace_with_hard_link(target: &Path, link: &Path) -> io::Result<()> {
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link)?;
    }
    fs::hard_link(target, link)
}

/// Symlinks may only point at siblings or descendants of their own
/// directory; later entries are written through them.
fn validate_symlink_target<R: Read>(entry: &tar::Entry<'_, R>) -> Result<(), ExtractionError> {
    validate_entry_path(&link_name(entry)?)
}

fn extract_zip(archive: &Path, dest: &Path, strip: usize) -> Result<usize, ExtractionError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let mut files = 0;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let entry_path = entry
            .enclosed_name()
            .ok_or_else(|| ExtractionError::PathTraversal {
                path: entry.name().to_owned(),
            })?;
        let Some(relative) = strip_components(&entry_path, strip) else {
            continue;
        };

        let dest_path = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&dest_path)?;
            continue;
        }
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&dest_path)?;
        io::copy(&mut entry, &mut out)?;
        files += 1;
    }
    Ok(files)
}

/// Drop `strip` leading normal components from `path`.
///
/// Returns `None` when nothing is left, so the entry is skipped.
#[must_use]
pub fn strip_components(path: &Path, strip: usize) -> Option<PathBuf> {
    let remaining: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .skip(strip)
        .collect();
    (!remaining.as_os_str().is_empty()).then_some(remaining)
}

/// Validate that an entry path does not escape the destination
/// directory via `..` components or absolute paths.
fn validate_entry_path(path: &Path) -> Result<(), ExtractionError> {
    let escapes = path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));
    if escapes {
        return Err(ExtractionError::PathTraversal {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

fn count_files(dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            count += count_files(&entry.path())?;
        } else {
            count += 1;
        }
    }
    Ok(count)
}

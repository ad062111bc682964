//! Archive naming and creation for built tools.
//!
//! Each tool's install directory becomes one `.zip` archive named
//! `<tool>-<version>-<suffix>.zip`, optionally merged with extra roots. An
//! aggregate archive bundles every install directory under its own prefix.
//! Entries are sorted by name so the same inputs produce the same archive.

use crate::config::{Compression, ToolBuild};
use crate::error::ForgeError;
use crate::exec::{CommandExecutor, Invocation};
use crate::version::{probe_tool_version, truncate_prerelease};
use camino::Utf8Path;
use log::{debug, info};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

/// Errors arising from archive creation.
#[derive(Debug, Error)]
pub enum PackagingError {
    /// An I/O operation failed (reading source files, writing the archive).
    #[error("I/O error during packaging: {0}")]
    Io(#[from] io::Error),

    /// The zip writer rejected an entry.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The directory to package does not exist.
    #[error("source directory not found: {}", .0.display())]
    MissingSource(PathBuf),

    /// The directory to package contains no files.
    #[error("nothing to package in {}", .0.display())]
    EmptySource(PathBuf),

    /// The external archiver failed.
    #[error("7z failed: {message}")]
    External {
        /// Description of the failure.
        message: String,
    },
}

/// Extra content merged into an archive: `root/subpath` stored under `subpath`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraRoot {
    /// Directory containing `subpath`.
    pub root: PathBuf,
    /// Relative path included, and its name inside the archive.
    pub subpath: String,
}

/// One archive to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageJob {
    /// Tool name, for logs.
    pub tool_name: String,
    /// Directory whose files form the archive root.
    pub source_directory: PathBuf,
    /// File name of the archive.
    pub output_archive_name: String,
    /// Extra content merged into the archive.
    pub extra_roots: Vec<ExtraRoot>,
}

/// A file and the name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveEntry {
    /// `/`-separated name inside the archive.
    pub name: String,
    /// File on disk.
    pub source: PathBuf,
}

/// Build an archive file name.
///
/// The version is cut at its first `-`.
///
/// # Examples
///
/// ```
/// use probe_forge::packaging::archive_name;
///
/// assert_eq!(
///     archive_name("openocd", "0.12.0-rc", "my-config-user"),
///     "openocd-0.12.0-my-config-user.zip"
/// );
/// ```
#[must_use]
pub fn archive_name(tool: &str, version: &str, suffix: &str) -> String {
    format!("{tool}-{}-{suffix}.zip", truncate_prerelease(version))
}

/// List every file below `root`, named `prefix/<relative path>`.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be read.
pub fn collect_tree(root: &Path, prefix: &str) -> Result<Vec<ArchiveEntry>, PackagingError> {
    let mut entries = Vec::new();
    walk(root, root, prefix, &mut entries)?;
    Ok(entries)
}

fn walk(
    root: &Path,
    dir: &Path,
    prefix: &str,
    entries: &mut Vec<ArchiveEntry>,
) -> Result<(), PackagingError> {
    for item in fs::read_dir(dir)? {
        let path = item?.path();
        if path.is_dir() {
            walk(root, &path, prefix, entries)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            entries.push(ArchiveEntry {
                name: entry_name(prefix, relative),
                source: path.clone(),
            });
        }
    }
    Ok(())
}

fn entry_name(prefix: &str, relative: &Path) -> String {
    let prefix = prefix.trim_matches('/');
    let parts = relative.components().filter_map(|c| match c {
        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
        _ => None,
    });
    std::iter::once(prefix.to_owned())
        .filter(|p| !p.is_empty())
        .chain(parts)
        .collect::<Vec<_>>()
        .join("/")
}

/// Collect the sorted entries of `job`.
///
/// # Errors
///
/// Returns [`PackagingError::MissingSource`] when the source directory or an
/// extra root is absent.
pub fn collect_entries(job: &PackageJob) -> Result<Vec<ArchiveEntry>, PackagingError> {
    if !job.source_directory.is_dir() {
        return Err(PackagingError::MissingSource(job.source_directory.clone()));
    }
    let mut entries = collect_tree(&job.source_directory, "")?;
    for extra in &job.extra_roots {
        let path = extra.root.join(&extra.subpath);
        if path.is_dir() {
            entries.extend(collect_tree(&path, &extra.subpath)?);
        } else if path.is_file() {
            entries.push(ArchiveEntry {
                name: extra.subpath.trim_matches('/').to_owned(),
                source: path,
            });
        } else {
            return Err(PackagingError::MissingSource(path));
        }
    }
    entries.sort();
    Ok(entries)
}

/// Write `entries` into a zip archive at `output` using `method`.
///
/// # Errors
///
/// Returns I/O or zip errors.
pub fn create_zip(
    output: &Path,
    entries: &[ArchiveEntry],
    method: CompressionMethod,
) -> Result<(), PackagingError> {
    let mut zip = ZipWriter::new(File::create(output)?);
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .large_file(true);
    for entry in entries {
        zip.start_file(entry.name.as_str(), options)?;
        io::copy(&mut File::open(&entry.source)?, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

/// Creates archives with a fixed compression.
pub struct Packager<'a> {
    compression: Compression,
    executor: &'a dyn CommandExecutor,
}

impl<'a> Packager<'a> {
    /// Create a packager; `executor` runs 7-Zip for LZMA archives.
    #[must_use]
    pub fn new(compression: Compression, executor: &'a dyn CommandExecutor) -> Self {
        Self {
            compression,
            executor,
        }
    }

    /// Write the archive described by `job` into `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PackagingError::MissingSource`] when the source is absent,
    /// [`PackagingError::EmptySource`] when it holds no files, and I/O, zip,
    /// or archiver errors otherwise.
    pub fn package(&self, job: &PackageJob, output_dir: &Path) -> Result<PathBuf, PackagingError> {
        let entries = collect_entries(job)?;
        if entries.is_empty() {
            return Err(PackagingError::EmptySource(job.source_directory.clone()));
        }
        let output = output_dir.join(&job.output_archive_name);
        self.write_archive(&output, &entries)?;
        info!(
            "{}: packaged {} files into {}",
            job.tool_name,
            entries.len(),
            output.display()
        );
        Ok(output)
    }

    /// Write one archive holding every `(directory, prefix)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`PackagingError::MissingSource`] for an absent directory and
    /// I/O, zip, or archiver errors otherwise.
    pub fn package_aggregate(
        &self,
        archive_name: &str,
        roots: &[(PathBuf, String)],
        output_dir: &Path,
    ) -> Result<PathBuf, PackagingError> {
        let mut entries = Vec::new();
        for (dir, prefix) in roots {
            if !dir.is_dir() {
                return Err(PackagingError::MissingSource(dir.clone()));
            }
            entries.extend(collect_tree(dir, prefix)?);
        }
        entries.sort();
        let output = output_dir.join(archive_name);
        self.write_archive(&output, &entries)?;
        info!("packaged {} files into {}", entries.len(), output.display());
        Ok(output)
    }

    fn write_archive(&self, output: &Path, entries: &[ArchiveEntry]) -> Result<(), PackagingError> {
        if output.exists() {
            fs::remove_file(output)?;
        }
        match self.compression {
            Compression::Zlib => create_zip(output, entries, CompressionMethod::Deflated),
            Compression::Bzip2 => create_zip(output, entries, CompressionMethod::Bzip2),
            Compression::Lzma => self.create_lzma_zip(output, entries),
        }
    }

    /// Stage the entries in a scratch directory and let 7-Zip write the
    /// archive, since the zip writer cannot produce LZMA entries.
    fn create_lzma_zip(&self, output: &Path, entries: &[ArchiveEntry]) -> Result<(), PackagingError> {
        let staging = tempfile::TempDir::new()?;
        for entry in entries {
            let staged = staging.path().join(&entry.name);
            if let Some(parent) = staged.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&entry.source, &staged)?;
        }

        let output = std::path::absolute(output)?;
        let staging_dir = camino::Utf8PathBuf::try_from(staging.path().to_path_buf())
            .map_err(|err| PackagingError::External {
                message: err.to_string(),
            })?;
        let invocation = Invocation::new("7z")
            .args(["a", "-tzip", "-mm=LZMA"])
            .arg(output.to_string_lossy())
            .arg(".")
            .current_dir(staging_dir);
        debug!("{}", invocation.command_line());
        let result = self
            .executor
            .run(&invocation)
            .map_err(|err| PackagingError::External {
                message: err.to_string(),
            })?;
        if !result.status.success() {
            return Err(PackagingError::External {
                message: String::from_utf8_lossy(&result.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

/// Probe a built tool's version and describe its archive.
///
/// `build_dir` is the layout's `build/` directory; the tool's binary is run
/// from `build_dir/<install_dir>/<binary>`.
///
/// # Errors
///
/// Returns [`ForgeError::VersionParse`] when the tool does not report a
/// version.
pub fn tool_job(
    executor: &dyn CommandExecutor,
    build: &ToolBuild,
    build_dir: &Utf8Path,
    suffix: &str,
) -> Result<PackageJob, ForgeError> {
    let install = build_dir.join(&build.install_dir);
    let version = probe_tool_version(
        executor,
        &build.name,
        &install.join(&build.binary),
        &build.version_args,
        &build.version_pattern,
    )?;
    Ok(PackageJob {
        tool_name: build.name.clone(),
        source_directory: install.into_std_path_buf(),
        output_archive_name: archive_name(&build.name, &version, suffix),
        extra_roots: build
            .extra_roots
            .iter()
            .map(|extra| ExtraRoot {
                root: build_dir.join(&extra.root).into_std_path_buf(),
                subpath: extra.subpath.clone(),
            })
            .collect(),
    })
}

#[cfg(test)]
#[path = "packaging_tests.rs"]
mod tests;

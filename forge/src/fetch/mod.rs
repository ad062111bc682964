//! Retrieval of declared artifacts into the build layout.
//!
//! The [`Fetcher`] turns each [`ArtifactDescriptor`] into a [`FetchResult`]:
//! downloads land in `downloads/`, archives are additionally extracted into
//! `build/<dir_name>`, and repositories are cloned into `build/<short_name>`.
//! In [`FetchMode::VerifyOnly`] nothing is transferred; the fetcher only
//! confirms that a previous run left each artifact in place.

pub mod download;
pub mod extraction;
pub mod git;

use crate::config::Layout;
use crate::error::{ForgeError, Result};
use crate::exec::CommandExecutor;
use crate::registry::{ArtifactDescriptor, ArtifactKind};
use camino::{Utf8Path, Utf8PathBuf};
use download::{DownloadOutcome, Downloader};
use extraction::ArchiveExtractor;
use log::{debug, info};
use std::fs;

/// Whether artifacts are retrieved or only verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Download, extract, and clone.
    Fetch,
    /// Check that earlier fetches left their results in place.
    VerifyOnly,
}

/// What fetching one descriptor produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    /// A downloaded file.
    File {
        /// Location under `downloads/`.
        path: Utf8PathBuf,
        /// Whether the existing copy was kept.
        unchanged: bool,
    },
    /// A downloaded archive and its extraction directory.
    Extracted {
        /// The archive under `downloads/`.
        archive: Utf8PathBuf,
        /// The extraction directory under `build/`.
        directory: Utf8PathBuf,
    },
    /// A repository checkout.
    Cloned {
        /// The checkout under `build/`.
        path: Utf8PathBuf,
        /// The branch or tag checked out.
        tree: String,
    },
}

impl FetchResult {
    /// The primary local path: the file for downloads and archives, the
    /// checkout for repositories.
    #[must_use]
    pub fn local_path(&self) -> &Utf8Path {
        match self {
            Self::File { path, .. } | Self::Cloned { path, .. } => path,
            Self::Extracted { archive, .. } => archive,
        }
    }
}

/// Fetches artifacts into a [`Layout`].
pub struct Fetcher<'a> {
    layout: &'a Layout,
    mode: FetchMode,
    downloader: &'a dyn Downloader,
    extractor: &'a dyn ArchiveExtractor,
    executor: &'a dyn CommandExecutor,
}

impl<'a> Fetcher<'a> {
    /// Create a fetcher writing into `layout`.
    #[must_use]
    pub fn new(
        layout: &'a Layout,
        mode: FetchMode,
        downloader: &'a dyn Downloader,
        extractor: &'a dyn ArchiveExtractor,
        executor: &'a dyn CommandExecutor,
    ) -> Self {
        Self {
            layout,
            mode,
            downloader,
            extractor,
            executor,
        }
    }

    /// Fetch every descriptor in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Propagates the first error from [`Fetcher::fetch`].
    pub fn fetch_all(&self, descriptors: &[ArtifactDescriptor]) -> Result<Vec<FetchResult>> {
        descriptors.iter().map(|d| self.fetch(d)).collect()
    }

    /// Fetch one descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::MissingArtifact`] in verify-only mode when the
    /// artifact is absent, and fetch, extraction, or git errors otherwise.
    pub fn fetch(&self, descriptor: &ArtifactDescriptor) -> Result<FetchResult> {
        match descriptor.kind {
            ArtifactKind::Download => {
                let (path, unchanged) = self.fetch_file(descriptor)?;
                Ok(FetchResult::File { path, unchanged })
            }
            ArtifactKind::Archive => self.fetch_archive(descriptor),
            ArtifactKind::Repository => self.fetch_repository(descriptor),
        }
    }

    fn fetch_file(&self, descriptor: &ArtifactDescriptor) -> Result<(Utf8PathBuf, bool)> {
        let file = descriptor.file.as_deref().ok_or_else(|| ForgeError::Config {
            path: descriptor.origin.clone(),
            reason: format!("descriptor `{}` has no `file`", descriptor.name),
        })?;
        let dest = self.layout.downloads.join(file);

        if self.mode == FetchMode::VerifyOnly {
            return require(&dest).map(|()| (dest, true));
        }

        let modified_since = fs::metadata(&dest).and_then(|m| m.modified()).ok();
        let outcome = self
            .downloader
            .fetch(&descriptor.href, dest.as_std_path(), modified_since)?;
        let unchanged = outcome == DownloadOutcome::NotModified;
        if unchanged {
            info!("{file} is up to date");
        } else {
            info!("downloaded {file}");
        }
        Ok((dest, unchanged))
    }

    fn fetch_archive(&self, descriptor: &ArtifactDescriptor) -> Result<FetchResult> {
        let (archive, _) = self.fetch_file(descriptor)?;
        let dir_name = descriptor.dir_name.as_deref().unwrap_or(&descriptor.short_name);
        let directory = self.layout.build.join(dir_name);

        if self.mode == FetchMode::VerifyOnly {
            require(&directory)?;
            return Ok(FetchResult::Extracted { archive, directory });
        }

        if directory.exists() {
            fs::remove_dir_all(&directory)?;
        }
        fs::create_dir_all(&directory)?;
        let count = self
            .extractor
            .extract(
                archive.as_std_path(),
                directory.as_std_path(),
                descriptor.extract_strip,
            )
            .map_err(|source| ForgeError::Extraction {
                archive: archive.clone(),
                source,
            })?;
        debug!("extracted {count} files from {archive} into {directory}");
        Ok(FetchResult::Extracted { archive, directory })
    }

    fn fetch_repository(&self, descriptor: &ArtifactDescriptor) -> Result<FetchResult> {
        let tree = descriptor.tree.clone().unwrap_or_default();
        let path = self.layout.build.join(&descriptor.short_name);

        if self.mode == FetchMode::VerifyOnly {
            if !git::checkout_exists(self.executor, &path)? {
                return Err(ForgeError::MissingArtifact { path });
            }
        } else {
            git::shallow_clone(
                self.executor,
                &descriptor.href,
                &tree,
                &path,
                descriptor.submodules,
            )?;
        }
        Ok(FetchResult::Cloned { path, tree })
    }
}

fn require(path: &Utf8Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ForgeError::MissingArtifact {
            path: path.to_owned(),
        })
    }
}

//! End-to-end orchestration.
//!
//! A run loads the configuration and descriptors, fetches (or verifies)
//! every artifact, shows artifact versions, provisions the build
//! environment, builds each tool whose install directory is missing, signs
//! the outputs, and packages them. The first error aborts the run.

use crate::config::{BuildContext, ConfigFile, RunOptions, ToolBuild};
use crate::error::{ForgeError, Result};
use crate::exec::CommandExecutor;
use crate::fetch::download::Downloader;
use crate::fetch::extraction::ArchiveExtractor;
use crate::fetch::{FetchMode, FetchResult, Fetcher};
use crate::gate::StageOutcome;
use crate::invoker::{BuildInvoker, ShellEnvironment};
use crate::output::{fetch_line, version_line, write_stderr_line};
use crate::packaging::{Packager, archive_name, tool_job};
use crate::registry::{self, ArtifactDescriptor, ArtifactKind};
use crate::signing::{
    CertificateStore, DEFAULT_SUBJECT_PREFIX, SignatureTool, Signer, SigningOutcome, SigningPolicy,
};
use crate::version::{VersionRecord, resolve};
use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use std::io::Write;
use std::path::PathBuf;

/// External collaborators a run drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Runs git, the environment shell, PowerShell, and archivers.
    pub executor: &'a dyn CommandExecutor,
    /// Retrieves remote files.
    pub downloader: &'a dyn Downloader,
    /// Unpacks archives.
    pub extractor: &'a dyn ArchiveExtractor,
    /// Lists signing certificates.
    pub certificates: &'a dyn CertificateStore,
    /// Applies signatures.
    pub signature_tool: &'a dyn SignatureTool,
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// One result per descriptor, in declaration order.
    pub fetched: Vec<FetchResult>,
    /// Displayed artifact versions.
    pub versions: Vec<VersionRecord>,
    /// Whether the environment bootstrap ran.
    pub bootstrapped: bool,
    /// Each tool build and whether it ran or was skipped.
    pub builds: Vec<(String, StageOutcome)>,
    /// What the signer did.
    pub signing: SigningOutcome,
    /// Archives written to `bin/`.
    pub archives: Vec<PathBuf>,
}

impl PipelineReport {
    /// Number of tool builds that actually ran.
    #[must_use]
    pub fn builds_run(&self) -> usize {
        self.builds
            .iter()
            .filter(|(_, outcome)| *outcome == StageOutcome::Ran)
            .count()
    }
}

/// A fully loaded, validated run.
pub struct Pipeline<'a> {
    context: BuildContext,
    config: ConfigFile,
    config_path: Utf8PathBuf,
    descriptors: Vec<ArtifactDescriptor>,
    collaborators: Collaborators<'a>,
}

impl<'a> Pipeline<'a> {
    /// Load the configuration named in `options` and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Config`] for unreadable or inconsistent
    /// configuration, including builds naming an unknown repository.
    pub fn load(options: &RunOptions, collaborators: Collaborators<'a>) -> Result<Self> {
        let config = ConfigFile::load(&options.config_path)?;
        let descriptors = registry::load(&config.descriptor_files(&options.config_path))?;
        let context = BuildContext::resolve(options, &config, collaborators.executor)?;
        let pipeline = Self {
            context,
            config,
            config_path: options.config_path.clone(),
            descriptors,
            collaborators,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    /// The resolved build context.
    #[must_use]
    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// The loaded descriptors.
    #[must_use]
    pub fn descriptors(&self) -> &[ArtifactDescriptor] {
        &self.descriptors
    }

    fn invalid(&self, reason: String) -> ForgeError {
        ForgeError::Config {
            path: self.config_path.clone(),
            reason,
        }
    }

    fn descriptor_of_kind(&self, short: &str, kind: ArtifactKind) -> Result<&ArtifactDescriptor> {
        registry::find(&self.descriptors, short)
            .filter(|d| d.kind == kind)
            .ok_or_else(|| self.invalid(format!("no {kind:?} descriptor named `{short}`")))
    }

    fn validate(&self) -> Result<()> {
        if let Some(env) = &self.config.env_dir {
            self.descriptor_of_kind(env, ArtifactKind::Archive)?;
        } else if !self.config.builds.is_empty() {
            return Err(self.invalid("`builds` require `env_dir`".to_owned()));
        }
        for build in &self.config.builds {
            self.descriptor_of_kind(&build.source, ArtifactKind::Repository)?;
        }
        self.ensure_distinct_build_dirs()
    }

    /// Reject two owners of the same `build/` subdirectory, or of one
    /// nested inside the other, since fetching or building either would
    /// clobber the other.
    fn ensure_distinct_build_dirs(&self) -> Result<()> {
        let descriptor_dirs = self.descriptors.iter().filter_map(|descriptor| {
            let dir = match descriptor.kind {
                ArtifactKind::Archive => descriptor
                    .dir_name
                    .as_deref()
                    .unwrap_or(&descriptor.short_name),
                ArtifactKind::Repository => &descriptor.short_name,
                ArtifactKind::Download => return None,
            };
            Some((Utf8Path::new(dir), format!("`{}`", descriptor.name)))
        });
        let install_dirs = self.config.builds.iter().map(|build| {
            (
                build.install_dir.as_path(),
                format!("the install directory of `{}`", build.name),
            )
        });
        let claims: Vec<(&Utf8Path, String)> = descriptor_dirs.chain(install_dirs).collect();
        for (index, (dir, owner)) in claims.iter().enumerate() {
            if let Some((other, other_owner)) = claims
                .iter()
                .skip(index + 1)
                .find(|(other, _)| dir.starts_with(other) || other.starts_with(dir))
            {
                return Err(self.invalid(format!(
                    "{owner} (`build/{dir}`) and {other_owner} (`build/{other}`) overlap"
                )));
            }
        }
        Ok(())
    }

    fn shell_environment(&self) -> Result<Option<ShellEnvironment>> {
        let Some(env) = &self.config.env_dir else {
            return Ok(None);
        };
        let descriptor = self.descriptor_of_kind(env, ArtifactKind::Archive)?;
        let dir = descriptor.dir_name.as_deref().unwrap_or(&descriptor.short_name);
        Ok(Some(ShellEnvironment::new(
            self.context.layout.build.join(dir),
            self.context.bitness.msystem(),
        )))
    }

    /// Execute every stage in order.
    ///
    /// Progress lines go to `stderr`; pass a sink to run quietly.
    ///
    /// # Errors
    ///
    /// Returns the first stage error.
    pub fn run(&self, stderr: &mut dyn Write) -> Result<PipelineReport> {
        let layout = &self.context.layout;
        layout.ensure()?;

        let fetched = self.fetch(stderr)?;
        let versions = self.show_versions(&fetched, stderr);

        let shell = self.shell_environment()?;
        let invoker = shell.map(|shell| BuildInvoker::new(shell, self.collaborators.executor));
        let bootstrapped = match &invoker {
            Some(invoker) if !self.context.skip_download => {
                write_stderr_line(stderr, "Provisioning build environment...");
                invoker.bootstrap(
                    &self.config.base_packages,
                    &self.context.mingw_arch,
                    &self.config.arch_packages,
                )?;
                true
            }
            _ => false,
        };

        let builds = match &invoker {
            Some(invoker) => self.build_tools(invoker, stderr)?,
            None => Vec::new(),
        };

        let signing = self.sign()?;
        let archives = self.package(stderr)?;

        Ok(PipelineReport {
            fetched,
            versions,
            bootstrapped,
            builds,
            signing,
            archives,
        })
    }

    fn fetch(&self, stderr: &mut dyn Write) -> Result<Vec<FetchResult>> {
        let mode = if self.context.skip_download {
            write_stderr_line(stderr, "Verifying previously fetched artifacts...");
            FetchMode::VerifyOnly
        } else {
            write_stderr_line(stderr, "Fetching artifacts...");
            FetchMode::Fetch
        };
        let fetcher = Fetcher::new(
            &self.context.layout,
            mode,
            self.collaborators.downloader,
            self.collaborators.extractor,
            self.collaborators.executor,
        );
        let mut results = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            let result = fetcher.fetch(descriptor)?;
            write_stderr_line(stderr, fetch_line(&result));
            results.push(result);
        }
        Ok(results)
    }

    fn show_versions(&self, fetched: &[FetchResult], stderr: &mut dyn Write) -> Vec<VersionRecord> {
        write_stderr_line(stderr, "Artifact versions:");
        self.descriptors
            .iter()
            .zip(fetched)
            .map(|(descriptor, result)| {
                let record = resolve(descriptor, Some(result.local_path().as_std_path()));
                write_stderr_line(stderr, version_line(&record));
                record
            })
            .collect()
    }

    fn install_dir(&self, build: &ToolBuild) -> Utf8PathBuf {
        self.context.layout.build.join(&build.install_dir)
    }

    fn build_tools(
        &self,
        invoker: &BuildInvoker<'_>,
        stderr: &mut dyn Write,
    ) -> Result<Vec<(String, StageOutcome)>> {
        let mut outcomes = Vec::with_capacity(self.config.builds.len());
        for build in &self.config.builds {
            let checkout = self.context.layout.build.join(&build.source);
            let install = self.install_dir(build);
            let outcome =
                invoker.build_tool(build, &checkout, &install, self.context.build_type)?;
            let verb = match outcome {
                StageOutcome::Ran => "built",
                StageOutcome::Skipped => "already built",
            };
            write_stderr_line(stderr, format!("  {verb}  {}", build.name));
            outcomes.push((build.name.clone(), outcome));
        }
        Ok(outcomes)
    }

    fn signing_targets(&self) -> Vec<Utf8PathBuf> {
        self.config
            .builds
            .iter()
            .flat_map(|build| {
                let install = self.install_dir(build);
                std::iter::once(build.binary.clone())
                    .chain(build.sign.iter().cloned())
                    .map(move |relative| install.join(relative))
            })
            .collect()
    }

    fn sign(&self) -> Result<SigningOutcome> {
        let policy = if self.context.skip_signing {
            SigningPolicy::Disabled
        } else {
            SigningPolicy::Enabled {
                subject_prefix: self
                    .config
                    .signing
                    .subject_prefix
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SUBJECT_PREFIX.to_owned()),
            }
        };
        Signer::new(
            policy,
            self.collaborators.certificates,
            self.collaborators.signature_tool,
        )
        .sign(&self.signing_targets())
    }

    fn package(&self, stderr: &mut dyn Write) -> Result<Vec<PathBuf>> {
        if self.config.builds.is_empty() {
            return Ok(Vec::new());
        }
        write_stderr_line(stderr, "Packaging...");
        let layout = &self.context.layout;
        let packager = Packager::new(self.context.compression, self.collaborators.executor);
        let mut archives = Vec::with_capacity(self.config.builds.len() + 1);
        for build in &self.config.builds {
            let job = tool_job(
                self.collaborators.executor,
                build,
                &layout.build,
                &self.context.suffix,
            )?;
            archives.push(packager.package(&job, layout.bin.as_std_path())?);
        }

        let aggregate = archive_name(
            &self.config.aggregate_name,
            &self.context.version,
            &self.context.suffix,
        );
        let roots: Vec<(PathBuf, String)> = self
            .config
            .builds
            .iter()
            .map(|build| {
                (
                    self.install_dir(build).into_std_path_buf(),
                    build.install_dir.as_str().to_owned(),
                )
            })
            .collect();
        archives.push(packager.package_aggregate(&aggregate, &roots, layout.bin.as_std_path())?);
        info!("wrote {} archives to {}", archives.len(), layout.bin);
        Ok(archives)
    }
}

/// Load and run a pipeline in one step.
///
/// # Errors
///
/// Returns configuration errors and the first stage error.
pub fn run(
    options: &RunOptions,
    collaborators: Collaborators<'_>,
    stderr: &mut dyn Write,
) -> Result<PipelineReport> {
    Pipeline::load(options, collaborators)?.run(stderr)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

//! Configuration loading and the resolved build context.
//!
//! The primary configuration file names the target bitness, the version and
//! build recipes, and optionally includes shared descriptor files. Files are
//! parsed as JSON when their extension is `.json` and as TOML otherwise.
//! [`BuildContext`] combines the configuration with CLI options once at
//! start-up; nothing mutates it afterwards.

use crate::error::{ForgeError, Result};
use crate::exec::{CommandExecutor, Invocation, combined_output};
use crate::version::find_version;
use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::fs;

/// Default name of the archive bundling every tool.
pub const DEFAULT_AGGREGATE_NAME: &str = "toolchain";

/// Target word size of the build environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "u8")]
pub enum Bitness {
    /// 32-bit (`i686`, `MINGW32`).
    Bits32,
    /// 64-bit (`x86_64`, `MINGW64`).
    Bits64,
}

impl Bitness {
    /// The default `mingw-w64` architecture for this bitness.
    #[must_use]
    pub const fn default_mingw_arch(self) -> &'static str {
        match self {
            Self::Bits32 => "i686",
            Self::Bits64 => "x86_64",
        }
    }

    /// The `MSYSTEM` environment name selecting the matching shell flavour.
    #[must_use]
    pub const fn msystem(self) -> &'static str {
        match self {
            Self::Bits32 => "MINGW32",
            Self::Bits64 => "MINGW64",
        }
    }
}

impl TryFrom<u8> for Bitness {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            32 => Ok(Self::Bits32),
            64 => Ok(Self::Bits64),
            other => Err(format!("unsupported bitness {other}; expected 32 or 64")),
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bits32 => f.write_str("32"),
            Self::Bits64 => f.write_str("64"),
        }
    }
}

/// Compression applied to output archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Compression {
    /// Deflate, readable everywhere.
    Zlib,
    /// Bzip2.
    Bzip2,
    /// LZMA, written through the external 7-Zip tool.
    Lzma,
}

/// Installation scope the packages are built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuildType {
    /// Machine-wide installation.
    System,
    /// Per-user installation; marks archive names with `-user`.
    User,
}

impl BuildType {
    /// Lower-case name passed to build scripts.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

/// An additional directory merged into a tool's archive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExtraRootSpec {
    /// Root directory, relative to `build/`.
    pub root: Utf8PathBuf,
    /// Path below `root` to include; stored in the archive under this name.
    pub subpath: String,
}

/// How to build, sign, and package one tool from a cloned repository.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolBuild {
    /// Tool name used in archive names (e.g. `openocd`).
    pub name: String,
    /// Short name of the repository descriptor holding the sources.
    pub source: String,
    /// Command line run by the environment shell inside the checkout.
    pub script: String,
    /// Install directory below `build/`; its presence marks the build done.
    pub install_dir: Utf8PathBuf,
    /// Main binary below `install_dir`, probed for its version and signed.
    pub binary: Utf8PathBuf,
    /// Arguments making the binary print its version.
    #[serde(default = "default_version_args")]
    pub version_args: Vec<String>,
    /// Regex with one capture group extracting the version from that output.
    #[serde(default = "default_version_pattern")]
    pub version_pattern: String,
    /// Further files below `install_dir` to sign.
    #[serde(default)]
    pub sign: Vec<Utf8PathBuf>,
    /// Extra directories merged into the tool's archive.
    #[serde(default)]
    pub extra_roots: Vec<ExtraRootSpec>,
}

fn default_version_args() -> Vec<String> {
    vec!["--version".to_owned()]
}

fn default_version_pattern() -> String {
    r"(\d+(?:\.\d+)+\S*)".to_owned()
}

/// Signing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SigningSection {
    /// Certificate subject prefix; the built-in prefix is used when absent.
    #[serde(default)]
    pub subject_prefix: Option<String>,
}

/// The primary configuration file.
///
/// Descriptor lists (`downloads`, `tools`, `repositories`) live in the same
/// file but are read by [`crate::registry`].
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    /// Target bitness, 32 or 64.
    pub bitness: Bitness,
    /// Override for the `mingw-w64` architecture name.
    #[serde(default)]
    pub mingw_arch: Option<String>,
    /// Version used for the aggregate archive.
    #[serde(default)]
    pub version: Option<String>,
    /// Command whose output yields the version when `version` is absent.
    #[serde(default)]
    pub version_probe: Option<Vec<String>>,
    /// Base name of the aggregate archive.
    #[serde(default = "default_aggregate_name")]
    pub aggregate_name: String,
    /// Short name of the archive descriptor providing the shell environment.
    #[serde(default)]
    pub env_dir: Option<String>,
    /// Packages installed into the environment for every architecture.
    #[serde(default = "default_base_packages")]
    pub base_packages: Vec<String>,
    /// Architecture packages, without the `mingw-w64-<arch>-` prefix.
    #[serde(default = "default_arch_packages")]
    pub arch_packages: Vec<String>,
    /// Signing settings.
    #[serde(default)]
    pub signing: SigningSection,
    /// Shared descriptor files, relative to this file.
    #[serde(default)]
    pub include: Vec<Utf8PathBuf>,
    /// Tool build recipes.
    #[serde(default)]
    pub builds: Vec<ToolBuild>,
}

fn default_aggregate_name() -> String {
    DEFAULT_AGGREGATE_NAME.to_owned()
}

fn default_base_packages() -> Vec<String> {
    ["base-devel", "git", "autoconf", "automake", "libtool", "pkgconf"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_arch_packages() -> Vec<String> {
    ["toolchain", "libusb", "hidapi"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Parse a structured data file, choosing the format by extension.
///
/// # Errors
///
/// Returns [`ForgeError::Config`] if the file cannot be read or parsed.
pub fn parse_structured<T: DeserializeOwned>(path: &Utf8Path) -> Result<T> {
    let contents = fs::read_to_string(path).map_err(|e| config_error(path, e))?;
    if path.extension() == Some("json") {
        serde_json::from_str(&contents).map_err(|e| config_error(path, e))
    } else {
        toml::from_str(&contents).map_err(|e| config_error(path, e))
    }
}

fn config_error(path: &Utf8Path, err: impl fmt::Display) -> ForgeError {
    ForgeError::Config {
        path: path.to_owned(),
        reason: err.to_string(),
    }
}

impl ConfigFile {
    /// Load the primary configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Config`] if the file is missing or malformed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        parse_structured(path)
    }

    /// Every file the artifact registry reads: this file plus its includes.
    #[must_use]
    pub fn descriptor_files(&self, config_path: &Utf8Path) -> Vec<Utf8PathBuf> {
        let base = config_path.parent().unwrap_or_else(|| Utf8Path::new(""));
        std::iter::once(config_path.to_owned())
            .chain(self.include.iter().map(|include| base.join(include)))
            .collect()
    }
}

/// Directory layout produced under the build root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// The build root.
    pub root: Utf8PathBuf,
    /// Transient fetch, extraction, clone, and build state.
    pub build: Utf8PathBuf,
    /// Raw downloaded files.
    pub downloads: Utf8PathBuf,
    /// Final archives.
    pub bin: Utf8PathBuf,
}

impl Layout {
    /// Derive the layout below `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        Self {
            build: root.join("build"),
            downloads: root.join("downloads"),
            bin: root.join("bin"),
            root,
        }
    }

    /// Create the layout directories if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be created.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.build, &self.downloads, &self.bin] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Options supplied on the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Path of the primary configuration file.
    pub config_path: Utf8PathBuf,
    /// Build root directory.
    pub build_root: Utf8PathBuf,
    /// Verify previous fetches instead of fetching.
    pub skip_download: bool,
    /// Do not sign build outputs.
    pub skip_signing: bool,
    /// Archive compression.
    pub compression: Compression,
    /// Installation scope.
    pub build_type: BuildType,
}

/// Process-wide settings resolved once per run.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Target bitness.
    pub bitness: Bitness,
    /// `mingw-w64` architecture name.
    pub mingw_arch: String,
    /// Installation scope.
    pub build_type: BuildType,
    /// Archive compression.
    pub compression: Compression,
    /// Verify previous fetches instead of fetching.
    pub skip_download: bool,
    /// Do not sign build outputs.
    pub skip_signing: bool,
    /// Version used for the aggregate archive.
    pub version: String,
    /// Suffix appended to every archive name.
    pub suffix: String,
    /// Base name of the configuration file.
    pub config_name: String,
    /// Output directory layout.
    pub layout: Layout,
}

impl BuildContext {
    /// Resolve the context from CLI options and the loaded configuration.
    ///
    /// When the configuration has no `version`, its `version_probe` command
    /// is run in the configuration's directory and the first version-shaped
    /// string in the output is used.
    ///
    /// # Errors
    ///
    /// Returns [`ForgeError::Config`] when no version can be determined or
    /// the configuration file name has no stem, and propagates probe
    /// failures.
    pub fn resolve(
        options: &RunOptions,
        config: &ConfigFile,
        executor: &dyn CommandExecutor,
    ) -> Result<Self> {
        let config_name = options
            .config_path
            .file_stem()
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| ForgeError::Config {
                path: options.config_path.clone(),
                reason: "configuration file name has no stem".to_owned(),
            })?
            .to_owned();

        let version = resolve_version(&options.config_path, config, executor)?;
        let mingw_arch = config
            .mingw_arch
            .clone()
            .unwrap_or_else(|| config.bitness.default_mingw_arch().to_owned());

        Ok(Self {
            bitness: config.bitness,
            mingw_arch,
            build_type: options.build_type,
            compression: options.compression,
            skip_download: options.skip_download,
            skip_signing: options.skip_signing,
            suffix: archive_suffix(&config_name, options.build_type),
            version,
            config_name,
            layout: Layout::new(options.build_root.clone()),
        })
    }
}

/// Build the archive suffix: the config base name, plus `-user` for user builds.
///
/// # Examples
///
/// ```
/// use probe_forge::config::{BuildType, archive_suffix};
///
/// assert_eq!(archive_suffix("my-config", BuildType::System), "my-config");
/// assert_eq!(archive_suffix("my-config", BuildType::User), "my-config-user");
/// ```
#[must_use]
pub fn archive_suffix(config_name: &str, build_type: BuildType) -> String {
    match build_type {
        BuildType::System => config_name.to_owned(),
        BuildType::User => format!("{config_name}-user"),
    }
}

fn resolve_version(
    config_path: &Utf8Path,
    config: &ConfigFile,
    executor: &dyn CommandExecutor,
) -> Result<String> {
    if let Some(version) = &config.version {
        return Ok(version.clone());
    }

    let Some((program, args)) = config
        .version_probe
        .as_deref()
        .and_then(<[String]>::split_first)
    else {
        return Err(ForgeError::Config {
            path: config_path.to_owned(),
            reason: "neither `version` nor `version_probe` is set".to_owned(),
        });
    };

    let mut invocation = Invocation::new(program.as_str()).args(args.iter().cloned());
    if let Some(dir) = config_path.parent().filter(|dir| !dir.as_str().is_empty()) {
        invocation = invocation.current_dir(dir);
    }
    let output = crate::exec::run_checked(executor, &invocation)?;
    let text = combined_output(&output);
    find_version(&text)
        .map(str::to_owned)
        .ok_or_else(|| ForgeError::Config {
            path: config_path.to_owned(),
            reason: format!("version probe printed no version: {}", text.trim()),
        })
}

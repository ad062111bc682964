//! Shared fixtures for probe-forge integration tests.
//!
//! Each sandbox is a temporary build root holding the configuration files a
//! scenario needs. Collaborators are the in-memory stand-ins from
//! `probe_forge::test_utils`, so no network access or real build
//! environment is required.

use camino::{Utf8Path, Utf8PathBuf};
use probe_forge::config::{BuildType, Compression, RunOptions};
use probe_forge::exec::Invocation;
use probe_forge::pipeline::Collaborators;
use probe_forge::signing::{Certificate, DEFAULT_SUBJECT_PREFIX};
use probe_forge::test_utils::{
    RecordingExecutor, StaticSigning, StubDownloader, StubExtractor, stdout_output, success_output,
};
use std::process::Output;
use tempfile::TempDir;

/// One versioned download and nothing to build.
pub const DOWNLOAD_ONLY_CONFIG: &str = r#"
bitness = 64
version = "1.4.0"

[[downloads]]
name = "Zadig"
href = "https://example.invalid/zadig/zadig-2.9.exe"
file = "zadig-2.9.exe"
"#;

/// An environment archive, one repository, and one tool build.
pub const TOOL_BUILD_CONFIG: &str = r#"
bitness = 64
version = "1.4.0"
env_dir = "msys2"
include = ["shared.toml"]

[[downloads]]
name = "Zadig"
href = "https://example.invalid/zadig/zadig-2.9.exe"
file = "zadig-2.9.exe"

[[builds]]
name = "openocd"
source = "openocd"
script = "./build.sh"
install_dir = "openocd-install"
binary = "bin/openocd.exe"
version_pattern = 'Debugger (\S+)'
"#;

/// Shared descriptors included by [`TOOL_BUILD_CONFIG`].
pub const SHARED_DESCRIPTORS: &str = r#"
[[tools]]
name = "msys2"
href = "https://example.invalid/msys2/msys2-base-x86_64.tar.xz"
file = "msys2-base-x86_64.tar.xz"
dir_name = "msys64"

[[repositories]]
name = "openocd"
href = "https://example.invalid/openocd.git"
tree = "v0.12.0"
"#;

/// A temporary build root.
pub struct Sandbox {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    /// Create an empty sandbox.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).expect("UTF-8 temp path");
        Self { _dir: dir, root }
    }

    /// The build root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Write `contents` to `name` below the sandbox and return its path.
    pub fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, contents).expect("write sandbox file");
        path
    }

    /// Write the tool-build configuration and its shared descriptors.
    pub fn tool_build_config(&self) -> Utf8PathBuf {
        self.write("shared.toml", SHARED_DESCRIPTORS);
        self.write("probe.toml", TOOL_BUILD_CONFIG)
    }

    /// Options for running `config` in this sandbox with signing skipped.
    pub fn options(&self, config: &Utf8Path) -> RunOptions {
        RunOptions {
            config_path: config.to_owned(),
            build_root: self.root.clone(),
            skip_download: false,
            skip_signing: true,
            compression: Compression::Zlib,
            build_type: BuildType::System,
        }
    }
}

/// Answer build-script and version-probe invocations the way the real
/// commands would: the script populates its install directory and the tool
/// prints its version.
pub fn simulate_build(invocation: &Invocation) -> Output {
    if invocation.program.ends_with("openocd.exe") {
        return stdout_output("Open On-Chip Debugger 0.12.0-rc2\n");
    }
    if let Some(install) = invocation.env_value("INSTALL_DIR") {
        let binary = Utf8Path::new(install).join("bin/openocd.exe");
        std::fs::create_dir_all(binary.parent().expect("binary has parent"))
            .expect("create install dir");
        std::fs::write(&binary, b"MZ").expect("write built binary");
    }
    success_output()
}

/// In-memory collaborators for one scenario.
pub struct Doubles {
    /// Records every external command.
    pub executor: RecordingExecutor,
    /// Serves downloads, honouring conditional requests.
    pub downloader: StubDownloader,
    /// Writes a marker file per extraction.
    pub extractor: StubExtractor,
    /// Holds one certificate matching the default subject prefix and
    /// records signed files.
    pub signing: StaticSigning,
}

impl Doubles {
    /// Doubles that simulate a successful build.
    pub fn new() -> Self {
        Self {
            executor: RecordingExecutor::with_responder(simulate_build),
            downloader: StubDownloader::conditional(b"payload"),
            extractor: StubExtractor::default(),
            signing: StaticSigning::new(vec![Certificate {
                thumbprint: "0A1B2C3D".to_owned(),
                subject: format!("{DEFAULT_SUBJECT_PREFIX}, O=Example"),
            }]),
        }
    }

    /// Borrow the doubles as pipeline collaborators.
    pub fn collaborators(&self) -> Collaborators<'_> {
        Collaborators {
            executor: &self.executor,
            downloader: &self.downloader,
            extractor: &self.extractor,
            certificates: &self.signing,
            signature_tool: &self.signing,
        }
    }

    /// Number of build-script invocations seen so far.
    pub fn builds_invoked(&self) -> usize {
        self.executor
            .count_matching(|inv| inv.env_value("INSTALL_DIR").is_some())
    }
}

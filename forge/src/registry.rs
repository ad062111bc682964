//! Artifact descriptor loading and validation.
//!
//! Descriptors come from the `downloads`, `tools`, and `repositories` arrays
//! of one or more configuration files. Each raw entry is normalized into an
//! [`ArtifactDescriptor`] whose [`ArtifactKind`] is decided by which optional
//! fields are present. Short names must be unique across all loaded files.

use crate::config::parse_structured;
use crate::error::{ForgeError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::HashMap;

/// Derive a short name by dropping every character outside `[A-Za-z0-9]`.
///
/// # Examples
///
/// ```
/// use probe_forge::registry::short_name;
///
/// assert_eq!(short_name("MSYS2 Base (x86_64)"), "MSYS2Basex8664");
/// assert_eq!(short_name("libusb-1.0"), "libusb10");
/// ```
#[must_use]
pub fn short_name(name: &str) -> String {
    name.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// How a descriptor's artifact is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// A single file downloaded into `downloads/`.
    Download,
    /// A downloaded archive extracted into `build/<dir_name>`.
    Archive,
    /// A git repository cloned into `build/<short_name>`.
    Repository,
}

/// A normalized, immutable artifact description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Human-readable name.
    pub name: String,
    /// `name` reduced to ASCII alphanumerics; unique per run.
    pub short_name: String,
    /// Download URL or repository URL.
    pub href: String,
    /// File name under `downloads/`.
    pub file: Option<String>,
    /// Extraction directory under `build/`.
    pub dir_name: Option<String>,
    /// Leading path components removed during extraction.
    pub extract_strip: usize,
    /// Branch or tag to clone.
    pub tree: Option<String>,
    /// Whether submodules are cloned too.
    pub submodules: bool,
    /// Which kind of artifact this is.
    pub kind: ArtifactKind,
    /// File the descriptor was loaded from.
    pub origin: Utf8PathBuf,
}

impl ArtifactDescriptor {
    /// Text used when displaying this artifact's version provenance.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.file.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    name: String,
    href: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default, alias = "dirName")]
    dir_name: Option<String>,
    #[serde(default, alias = "extractStrip")]
    extract_strip: usize,
    #[serde(default)]
    tree: Option<String>,
    #[serde(default)]
    submodules: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DescriptorFile {
    #[serde(default)]
    downloads: Vec<RawDescriptor>,
    #[serde(default)]
    tools: Vec<RawDescriptor>,
    #[serde(default)]
    repositories: Vec<RawDescriptor>,
}

impl RawDescriptor {
    fn kind(&self) -> std::result::Result<ArtifactKind, String> {
        match (&self.file, &self.dir_name, &self.tree) {
            (_, Some(_), Some(_)) => Err("`dir_name` and `tree` are mutually exclusive".to_owned()),
            (Some(_), Some(_), None) => Ok(ArtifactKind::Archive),
            (None, Some(_), None) => Err("`dir_name` requires `file`".to_owned()),
            (_, None, Some(_)) => Ok(ArtifactKind::Repository),
            (Some(_), None, None) => Ok(ArtifactKind::Download),
            (None, None, None) => Err("one of `file` or `tree` is required".to_owned()),
        }
    }

    fn normalize(self, origin: &Utf8Path) -> Result<ArtifactDescriptor> {
        let invalid = |reason: String| ForgeError::Config {
            path: origin.to_owned(),
            reason: format!("descriptor `{}`: {reason}", self.name),
        };
        let kind = self.kind().map_err(invalid)?;
        let short = short_name(&self.name);
        if short.is_empty() {
            return Err(invalid("name has no alphanumeric characters".to_owned()));
        }
        if self.href.trim().is_empty() {
            return Err(invalid("`href` is empty".to_owned()));
        }
        Ok(ArtifactDescriptor {
            short_name: short,
            name: self.name,
            href: self.href,
            file: self.file,
            dir_name: self.dir_name,
            extract_strip: self.extract_strip,
            tree: self.tree,
            submodules: self.submodules,
            kind,
            origin: origin.to_owned(),
        })
    }
}

/// Load every descriptor from `paths`, in file order.
///
/// # Errors
///
/// Returns [`ForgeError::Config`] when a file cannot be parsed, a descriptor
/// matches no kind, or two descriptors share a short name.
pub fn load(paths: &[Utf8PathBuf]) -> Result<Vec<ArtifactDescriptor>> {
    let mut descriptors = Vec::new();
    for path in paths {
        let file: DescriptorFile = parse_structured(path)?;
        for raw in file
            .downloads
            .into_iter()
            .chain(file.tools)
            .chain(file.repositories)
        {
            descriptors.push(raw.normalize(path)?);
        }
    }
    ensure_unique(&descriptors)?;
    Ok(descriptors)
}

fn ensure_unique(descriptors: &[ArtifactDescriptor]) -> Result<()> {
    let mut seen: HashMap<&str, &ArtifactDescriptor> = HashMap::new();
    for descriptor in descriptors {
        if let Some(first) = seen.insert(&descriptor.short_name, descriptor) {
            return Err(ForgeError::Config {
                path: descriptor.origin.clone(),
                reason: format!(
                    "short name `{}` of `{}` collides with `{}` from {}",
                    descriptor.short_name, descriptor.name, first.name, first.origin
                ),
            });
        }
    }
    Ok(())
}

/// Find a descriptor by short name.
#[must_use]
pub fn find<'a>(descriptors: &'a [ArtifactDescriptor], short: &str) -> Option<&'a ArtifactDescriptor> {
    descriptors.iter().find(|d| d.short_name == short)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    #[fixture]
    fn temp_dir() -> TempDir {
        TempDir::new().expect("temp dir creation succeeds")
    }

    fn write(dir: &TempDir, name: &str, contents: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::try_from(dir.path().join(name)).expect("UTF-8 temp path");
        fs::write(&path, contents).expect("write descriptor file");
        path
    }

    #[rstest]
    #[case("OpenOCD", "OpenOCD")]
    #[case("MSYS2 base-x86_64", "MSYS2basex8664")]
    #[case("libusb 1.0.27 (win)", "libusb1027win")]
    #[case("---", "")]
    fn short_name_keeps_only_ascii_alphanumerics(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(short_name(name), expected);
    }

    #[rstest]
    #[case("Zadig 2.9")]
    #[case("ümlaut-tool_v1")]
    fn short_name_is_pure_and_alphanumeric(#[case] name: &str) {
        let first = short_name(name);
        assert_eq!(first, short_name(name));
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[rstest]
    fn load_classifies_each_kind(temp_dir: TempDir) {
        let path = write(
            &temp_dir,
            "probe.toml",
            r#"
[[downloads]]
name = "Zadig"
href = "https://example.test/zadig-2.9.exe"
file = "zadig-2.9.exe"

[[downloads]]
name = "MSYS2 base"
href = "https://example.test/msys2-base-x86_64-20240727.tar.zst"
file = "msys2-base.tar.zst"
dir_name = "msys64"
extract_strip = 1

[[repositories]]
name = "openocd"
href = "https://example.test/openocd.git"
tree = "v0.12.0"
submodules = true
"#,
        );

        let descriptors = load(&[path]).expect("descriptors load");
        let kinds: Vec<_> = descriptors.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![ArtifactKind::Download, ArtifactKind::Archive, ArtifactKind::Repository]
        );
        assert_eq!(descriptors[1].extract_strip, 1);
        assert_eq!(descriptors[1].short_name, "MSYS2base");
        assert!(descriptors[2].submodules);
    }

    #[rstest]
    fn load_accepts_json_with_camel_case_aliases(temp_dir: TempDir) {
        let path = write(
            &temp_dir,
            "shared.json",
            r#"{ "tools": [ { "name": "libusb", "href": "https://example.test/libusb.7z",
                 "file": "libusb.7z", "dirName": "libusb", "extractStrip": 2 } ] }"#,
        );
        let descriptors = load(&[path]).expect("descriptors load");
        assert_eq!(descriptors[0].kind, ArtifactKind::Archive);
        assert_eq!(descriptors[0].extract_strip, 2);
    }

    #[rstest]
    #[case::no_file_or_tree("name = \"x\"\nhref = \"https://e.test/x\"\n", "required")]
    #[case::dir_and_tree(
        "name = \"x\"\nhref = \"https://e.test/x\"\nfile = \"x.zip\"\ndir_name = \"x\"\ntree = \"main\"\n",
        "mutually exclusive"
    )]
    #[case::dir_without_file("name = \"x\"\nhref = \"https://e.test/x\"\ndir_name = \"x\"\n", "requires")]
    #[case::empty_short_name("name = \"--\"\nhref = \"https://e.test/x\"\nfile = \"x\"\n", "alphanumeric")]
    fn invalid_descriptors_are_config_errors(
        temp_dir: TempDir,
        #[case] entry: &str,
        #[case] fragment: &str,
    ) {
        let path = write(&temp_dir, "bad.toml", &format!("[[downloads]]\n{entry}"));
        let err = load(&[path]).expect_err("descriptor rejected");
        assert!(matches!(err, ForgeError::Config { .. }));
        assert!(err.to_string().contains(fragment), "message: {err}");
    }

    #[rstest]
    fn missing_required_field_names_the_file(temp_dir: TempDir) {
        let path = write(&temp_dir, "bad.toml", "[[downloads]]\nname = \"x\"\n");
        let err = load(&[path.clone()]).expect_err("missing href rejected");
        assert!(err.to_string().contains(path.as_str()));
    }

    #[rstest]
    fn colliding_short_names_across_files_are_rejected(temp_dir: TempDir) {
        let first = write(
            &temp_dir,
            "a.toml",
            "[[tools]]\nname = \"lib-usb\"\nhref = \"https://e.test/a\"\nfile = \"a.7z\"\n",
        );
        let second = write(
            &temp_dir,
            "b.toml",
            "[[tools]]\nname = \"lib usb\"\nhref = \"https://e.test/b\"\nfile = \"b.7z\"\n",
        );

        let err = load(&[first, second.clone()]).expect_err("collision rejected");
        let ForgeError::Config { path, reason } = err else {
            panic!("expected a configuration error");
        };
        assert_eq!(path, second);
        assert!(reason.contains("libusb"));
    }

    #[test]
    fn find_matches_short_name() {
        let descriptor = ArtifactDescriptor {
            name: "open-ocd".to_owned(),
            short_name: "openocd".to_owned(),
            href: "https://e.test/openocd.git".to_owned(),
            file: None,
            dir_name: None,
            extract_strip: 0,
            tree: Some("master".to_owned()),
            submodules: false,
            kind: ArtifactKind::Repository,
            origin: Utf8PathBuf::from("probe.toml"),
        };
        let all = [descriptor];
        assert!(find(&all, "openocd").is_some());
        assert!(find(&all, "open-ocd").is_none());
    }
}

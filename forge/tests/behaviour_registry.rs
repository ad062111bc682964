//! Behavioural tests for artifact descriptor loading.

mod support;

use camino::Utf8PathBuf;
use probe_forge::config::ConfigFile;
use probe_forge::error::{ForgeError, Result as ForgeResult};
use probe_forge::registry::{self, ArtifactDescriptor, ArtifactKind};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;
use support::Sandbox;

struct RegistryWorld {
    sandbox: Sandbox,
    files: RefCell<Vec<Utf8PathBuf>>,
    loaded: RefCell<Option<ForgeResult<Vec<ArtifactDescriptor>>>>,
}

#[fixture]
fn world() -> RegistryWorld {
    RegistryWorld {
        sandbox: Sandbox::new(),
        files: RefCell::new(Vec::new()),
        loaded: RefCell::new(None),
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|stripped| stripped.strip_suffix('"'))
        .unwrap_or(value)
}

impl RegistryWorld {
    fn descriptors(&self) -> std::cell::Ref<'_, Vec<ArtifactDescriptor>> {
        std::cell::Ref::map(self.loaded.borrow(), |loaded| match loaded {
            Some(Ok(descriptors)) => descriptors,
            Some(Err(err)) => panic!("registry failed to load: {err}"),
            None => panic!("registry was not loaded"),
        })
    }
}

#[given("a configuration including shared descriptors")]
fn given_including_config(world: &RegistryWorld) {
    let config_path = world.sandbox.tool_build_config();
    let config = ConfigFile::load(&config_path).expect("configuration loads");
    world.files.replace(config.descriptor_files(&config_path));
}

#[given("two files that both describe {name}")]
fn given_duplicate_descriptors(world: &RegistryWorld, name: String) {
    let name = unquote(&name);
    let first = world.sandbox.write(
        "first.toml",
        &format!("[[tools]]\nname = \"{name}\"\nhref = \"https://a.invalid/x.zip\"\nfile = \"x.zip\"\n"),
    );
    let second = world.sandbox.write(
        "second.toml",
        &format!("[[tools]]\nname = \"{name}\"\nhref = \"https://b.invalid/y.zip\"\nfile = \"y.zip\"\n"),
    );
    world.files.replace(vec![first, second]);
}

#[when("the registry is loaded")]
fn when_registry_loaded(world: &RegistryWorld) {
    let result = registry::load(&world.files.borrow());
    world.loaded.replace(Some(result));
}

#[then("the registry holds {names}")]
fn then_registry_holds(world: &RegistryWorld, names: String) {
    let expected: Vec<&str> = unquote(&names).split(", ").collect();
    let descriptors = world.descriptors();
    let actual: Vec<&str> = descriptors.iter().map(|d| d.short_name.as_str()).collect();
    assert_eq!(actual, expected);
}

#[then("{short} is an archive extracted to {dir}")]
fn then_archive_extracted_to(world: &RegistryWorld, short: String, dir: String) {
    let descriptors = world.descriptors();
    let descriptor = registry::find(&descriptors, unquote(&short)).expect("descriptor present");
    assert_eq!(descriptor.kind, ArtifactKind::Archive);
    assert_eq!(descriptor.dir_name.as_deref(), Some(unquote(&dir)));
}

#[then("loading fails naming the second file")]
fn then_loading_fails(world: &RegistryWorld) {
    let loaded = world.loaded.borrow();
    match loaded.as_ref() {
        Some(Err(ForgeError::Config { path, reason })) => {
            assert!(path.as_str().ends_with("second.toml"), "path: {path}");
            assert!(reason.contains("libusb"), "reason: {reason}");
        }
        Some(Err(err)) => panic!("unexpected error: {err}"),
        Some(Ok(_)) => panic!("duplicate short names were accepted"),
        None => panic!("registry was not loaded"),
    }
}

#[scenario(path = "tests/features/registry.feature", index = 0)]
fn scenario_included_descriptors(world: RegistryWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/registry.feature", index = 1)]
fn scenario_duplicate_short_name(world: RegistryWorld) {
    let _ = world;
}

//! Behavioural tests for complete pipeline runs.
//!
//! Scenarios drive [`probe_forge::pipeline::run`] against a temporary build
//! root with in-memory collaborators and check what lands on disk.

mod support;

use probe_forge::error::{ForgeError, Result as ForgeResult};
use probe_forge::pipeline::{self, PipelineReport};
use probe_forge::signing::SigningOutcome;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;
use support::{DOWNLOAD_ONLY_CONFIG, Doubles, Sandbox};

struct PipelineWorld {
    sandbox: Sandbox,
    doubles: Doubles,
    config: RefCell<Option<camino::Utf8PathBuf>>,
    downloads_before: RefCell<usize>,
    signing_enabled: RefCell<bool>,
    runs: RefCell<Vec<ForgeResult<PipelineReport>>>,
}

#[fixture]
fn world() -> PipelineWorld {
    PipelineWorld {
        sandbox: Sandbox::new(),
        doubles: Doubles::new(),
        config: RefCell::new(None),
        downloads_before: RefCell::new(0),
        signing_enabled: RefCell::new(false),
        runs: RefCell::new(Vec::new()),
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|stripped| stripped.strip_suffix('"'))
        .unwrap_or(value)
}

impl PipelineWorld {
    fn run(&self, skip_download: bool) -> ForgeResult<PipelineReport> {
        let config = self.config.borrow();
        let config = config.as_ref().expect("configuration not written");
        let mut options = self.sandbox.options(config);
        options.skip_download = skip_download;
        options.skip_signing = !*self.signing_enabled.borrow();
        pipeline::run(
            &options,
            self.doubles.collaborators(),
            &mut std::io::sink(),
        )
    }

    fn record_run(&self, skip_download: bool) {
        let result = self.run(skip_download);
        self.runs.borrow_mut().push(result);
    }

    fn last_report(&self) -> PipelineReport {
        let runs = self.runs.borrow();
        match runs.last() {
            Some(Ok(report)) => report.clone(),
            Some(Err(err)) => panic!("run failed: {err}"),
            None => panic!("pipeline was not run"),
        }
    }
}

#[given("a 64-bit configuration with one versioned download")]
fn given_download_only(world: &PipelineWorld) {
    let path = world.sandbox.write("probe.toml", DOWNLOAD_ONLY_CONFIG);
    world.config.replace(Some(path));
}

#[given("a configuration that builds openocd")]
fn given_tool_build(world: &PipelineWorld) {
    let path = world.sandbox.tool_build_config();
    world.config.replace(Some(path));
}

#[given("signing is enabled")]
fn given_signing_enabled(world: &PipelineWorld) {
    world.signing_enabled.replace(true);
}

#[given("the artifacts were fetched earlier")]
fn given_fetched_earlier(world: &PipelineWorld) {
    world.run(false).expect("initial fetch succeeds");
    world.downloads_before.replace(world.doubles.downloader.calls());
}

#[when("the pipeline runs")]
fn when_pipeline_runs(world: &PipelineWorld) {
    world.record_run(false);
}

#[when("the pipeline runs again")]
fn when_pipeline_runs_again(world: &PipelineWorld) {
    world.record_run(false);
}

#[when("the pipeline runs with downloads skipped")]
fn when_pipeline_runs_skipping_downloads(world: &PipelineWorld) {
    world.record_run(true);
}

#[then("the run succeeds")]
fn then_run_succeeds(world: &PipelineWorld) {
    world.last_report();
}

#[then("every run succeeds")]
fn then_every_run_succeeds(world: &PipelineWorld) {
    let runs = world.runs.borrow();
    assert!(runs.len() > 1, "expected several runs");
    for run in runs.iter() {
        if let Err(err) = run {
            panic!("run failed: {err}");
        }
    }
}

#[then("the download is stored as {file}")]
fn then_download_stored(world: &PipelineWorld, file: String) {
    let path = world.sandbox.root().join("downloads").join(unquote(&file));
    assert!(path.is_file(), "missing {path}");
}

#[then("no file is signed")]
fn then_nothing_signed(world: &PipelineWorld) {
    assert!(world.doubles.signing.signed().is_empty());
    let powershell = world
        .doubles
        .executor
        .count_matching(|inv| inv.program == "powershell");
    assert_eq!(powershell, 0);
}

#[then("no archive is written")]
fn then_no_archive(world: &PipelineWorld) {
    assert!(world.last_report().archives.is_empty());
    let bin = world.sandbox.root().join("bin");
    let entries = std::fs::read_dir(&bin).expect("bin exists").count();
    assert_eq!(entries, 0);
}

#[then("the tool build ran {count} time")]
fn then_tool_built(world: &PipelineWorld, count: String) {
    let expected: usize = count.parse().expect("numeric count");
    assert_eq!(world.doubles.builds_invoked(), expected);
    assert_eq!(world.last_report().builds_run(), 0);
}

#[then("the downloader was consulted on every run")]
fn then_downloader_consulted(world: &PipelineWorld) {
    let runs = world.runs.borrow().len();
    // Two files per run: the Zadig executable and the environment archive.
    assert_eq!(world.doubles.downloader.calls(), runs * 2);
}

#[then("every run signed {file}")]
fn then_every_run_signed(world: &PipelineWorld, file: String) {
    let runs = world.runs.borrow();
    for run in runs.iter() {
        let report = run.as_ref().expect("run succeeded");
        assert_eq!(report.signing, SigningOutcome::Signed(1));
    }
    let signed = world.doubles.signing.signed();
    assert_eq!(signed.len(), runs.len());
    assert!(
        signed.iter().all(|path| path.as_str().ends_with(unquote(&file))),
        "signed: {signed:?}"
    );
}

#[then("the archive {name} is written")]
fn then_archive_written(world: &PipelineWorld, name: String) {
    let path = world.sandbox.root().join("bin").join(unquote(&name));
    assert!(path.is_file(), "missing {path}");
    assert!(
        world
            .last_report()
            .archives
            .iter()
            .any(|archive| archive.ends_with(unquote(&name)))
    );
}

#[then("the downloader was not consulted again")]
fn then_downloader_idle(world: &PipelineWorld) {
    assert_eq!(
        world.doubles.downloader.calls(),
        *world.downloads_before.borrow()
    );
}

#[then("the run fails naming {file}")]
fn then_run_fails(world: &PipelineWorld, file: String) {
    let runs = world.runs.borrow();
    match runs.last() {
        Some(Err(err @ ForgeError::MissingArtifact { path })) => {
            assert!(path.as_str().ends_with(unquote(&file)), "{err}");
        }
        Some(Err(err)) => panic!("unexpected error: {err}"),
        Some(Ok(_)) => panic!("run unexpectedly succeeded"),
        None => panic!("pipeline was not run"),
    }
}

// Bindings are index-based; keep them in step with the feature file.
#[scenario(path = "tests/features/pipeline.feature", index = 0)]
fn scenario_download_only_run(world: PipelineWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/pipeline.feature", index = 1)]
fn scenario_repeat_run(world: PipelineWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/pipeline.feature", index = 2)]
fn scenario_skip_download_verifies(world: PipelineWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/pipeline.feature", index = 3)]
fn scenario_skip_download_missing(world: PipelineWorld) {
    let _ = world;
}

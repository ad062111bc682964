//! Unit tests for the packaging module.

use super::*;
use crate::config::ExtraRootSpec;
use crate::test_utils::{
    ExpectedCall, RecordingExecutor, StubExecutor, failure_output, stdout_output, success_output,
};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use std::cell::Cell;
use std::rc::Rc;
use tempfile::TempDir;

#[fixture]
fn temp_dir() -> TempDir {
    TempDir::new().expect("temp dir creation succeeds")
}

fn write_file(path: &Path, body: &[u8]) {
    fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
    fs::write(path, body).expect("write file");
}

fn install_tree(dir: &TempDir) -> PathBuf {
    let install = dir.path().join("build").join("openocd-install");
    write_file(&install.join("bin/openocd.exe"), b"MZ");
    write_file(&install.join("share/openocd/scripts/target/stm32f1x.cfg"), b"cfg");
    write_file(&install.join("README"), b"readme");
    install
}

fn zip_names(path: &Path) -> Vec<String> {
    let archive = zip::ZipArchive::new(File::open(path).expect("open zip")).expect("read zip");
    archive.file_names().map(str::to_owned).collect()
}

fn job(source: PathBuf, extra_roots: Vec<ExtraRoot>) -> PackageJob {
    PackageJob {
        tool_name: "openocd".to_owned(),
        source_directory: source,
        output_archive_name: "openocd-0.12.0-probe.zip".to_owned(),
        extra_roots,
    }
}

#[rstest]
#[case("openocd", "0.12.0-rc", "my-config-user", "openocd-0.12.0-my-config-user.zip")]
#[case("openocd", "0.12.0", "my-config", "openocd-0.12.0-my-config.zip")]
#[case("stlink", "1.8.0-12-gabc", "probe", "stlink-1.8.0-probe.zip")]
fn archive_name_truncates_prerelease(
    #[case] tool: &str,
    #[case] version: &str,
    #[case] suffix: &str,
    #[case] expected: &str,
) {
    assert_eq!(archive_name(tool, version, suffix), expected);
}

#[rstest]
fn collect_entries_are_sorted_and_slash_separated(temp_dir: TempDir) {
    let install = install_tree(&temp_dir);
    let entries = collect_entries(&job(install, Vec::new())).expect("entries collected");
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "README",
            "bin/openocd.exe",
            "share/openocd/scripts/target/stm32f1x.cfg",
        ]
    );
}

#[rstest]
fn extra_roots_are_stored_under_subpath(temp_dir: TempDir) {
    let install = install_tree(&temp_dir);
    let drivers = temp_dir.path().join("build").join("drivers");
    write_file(&drivers.join("udev/60-openocd.rules"), b"rules");

    let entries = collect_entries(&job(
        install,
        vec![ExtraRoot {
            root: drivers,
            subpath: "udev".to_owned(),
        }],
    ))
    .expect("entries collected");

    assert!(entries.iter().any(|e| e.name == "udev/60-openocd.rules"));
}

#[rstest]
fn missing_source_is_reported(temp_dir: TempDir) {
    let executor = StubExecutor::new(Vec::new());
    let packager = Packager::new(Compression::Zlib, &executor);
    let err = packager
        .package(&job(temp_dir.path().join("absent"), Vec::new()), temp_dir.path())
        .expect_err("source missing");
    assert!(matches!(err, PackagingError::MissingSource(_)));
}

#[rstest]
fn empty_source_is_reported(temp_dir: TempDir) {
    let empty = temp_dir.path().join("empty");
    fs::create_dir_all(&empty).expect("create empty dir");
    let executor = StubExecutor::new(Vec::new());
    let packager = Packager::new(Compression::Zlib, &executor);
    let err = packager
        .package(&job(empty, Vec::new()), temp_dir.path())
        .expect_err("nothing to package");
    assert!(matches!(err, PackagingError::EmptySource(_)));
}

#[rstest]
#[case::zlib(Compression::Zlib, CompressionMethod::Deflated)]
#[case::bzip2(Compression::Bzip2, CompressionMethod::Bzip2)]
fn in_process_archives_use_requested_method(
    temp_dir: TempDir,
    #[case] compression: Compression,
    #[case] method: CompressionMethod,
) {
    let install = install_tree(&temp_dir);
    let out = temp_dir.path().join("bin");
    fs::create_dir_all(&out).expect("create output dir");
    let executor = StubExecutor::new(Vec::new());

    let archive = Packager::new(compression, &executor)
        .package(&job(install, Vec::new()), &out)
        .expect("packaging succeeds");

    assert_eq!(archive, out.join("openocd-0.12.0-probe.zip"));
    let mut zip = zip::ZipArchive::new(File::open(&archive).expect("open")).expect("read zip");
    let entry = zip.by_name("bin/openocd.exe").expect("entry present");
    assert_eq!(entry.compression(), method);
}

#[rstest]
fn existing_archive_is_replaced(temp_dir: TempDir) {
    let install = install_tree(&temp_dir);
    let out = temp_dir.path().join("bin");
    write_file(&out.join("openocd-0.12.0-probe.zip"), b"stale");
    let executor = StubExecutor::new(Vec::new());

    let archive = Packager::new(Compression::Zlib, &executor)
        .package(&job(install, Vec::new()), &out)
        .expect("packaging succeeds");

    assert_eq!(zip_names(&archive).len(), 3);
}

#[rstest]
fn lzma_runs_seven_zip_in_staging_copy(temp_dir: TempDir) {
    let install = install_tree(&temp_dir);
    let out = temp_dir.path().join("bin");
    fs::create_dir_all(&out).expect("create output dir");
    let staged_seen = Rc::new(Cell::new(false));
    let seen = Rc::clone(&staged_seen);
    let executor = RecordingExecutor::with_responder(move |inv| {
        let staged = inv
            .working_dir()
            .is_some_and(|dir| dir.join("bin/openocd.exe").is_file());
        seen.set(staged);
        success_output()
    });

    Packager::new(Compression::Lzma, &executor)
        .package(&job(install, Vec::new()), &out)
        .expect("packaging succeeds");

    let calls = executor.invocations();
    let call = calls.first().expect("7z invoked");
    assert_eq!(call.program, "7z");
    assert_eq!(call.args.get(..3), Some(&["a".to_owned(), "-tzip".to_owned(), "-mm=LZMA".to_owned()][..]));
    assert!(call.args.get(3).is_some_and(|a| a.ends_with("openocd-0.12.0-probe.zip")));
    assert_eq!(call.args.get(4).map(String::as_str), Some("."));
    assert!(staged_seen.get());
}

#[rstest]
fn lzma_failure_is_reported(temp_dir: TempDir) {
    let install = install_tree(&temp_dir);
    let executor = RecordingExecutor::with_responder(|_| failure_output("7z: not found"));

    let err = Packager::new(Compression::Lzma, &executor)
        .package(&job(install, Vec::new()), temp_dir.path())
        .expect_err("7z fails");
    assert!(matches!(err, PackagingError::External { ref message } if message.contains("not found")));
}

#[rstest]
fn aggregate_prefixes_each_install_dir(temp_dir: TempDir) {
    let openocd = install_tree(&temp_dir);
    let stlink = temp_dir.path().join("build").join("stlink-install");
    write_file(&stlink.join("bin/st-flash.exe"), b"MZ");
    let executor = StubExecutor::new(Vec::new());

    let archive = Packager::new(Compression::Zlib, &executor)
        .package_aggregate(
            "toolchain-1.4.0-probe.zip",
            &[
                (openocd, "openocd-install".to_owned()),
                (stlink, "stlink-install".to_owned()),
            ],
            temp_dir.path(),
        )
        .expect("aggregate written");

    let names = zip_names(&archive);
    assert!(names.contains(&"openocd-install/bin/openocd.exe".to_owned()));
    assert!(names.contains(&"stlink-install/bin/st-flash.exe".to_owned()));
}

#[rstest]
fn tool_job_probes_version_and_maps_extra_roots(temp_dir: TempDir) {
    let build_dir = Utf8PathBuf::try_from(temp_dir.path().join("build")).expect("UTF-8 path");
    let binary: &'static str = Box::leak(
        build_dir
            .join("openocd-install/bin/openocd.exe")
            .to_string()
            .into_boxed_str(),
    );
    let executor = StubExecutor::new(vec![ExpectedCall {
        program: binary,
        args: vec!["--version"],
        result: Ok(stdout_output("Open On-Chip Debugger 0.12.0-rc2\n")),
    }]);
    let build = ToolBuild {
        name: "openocd".to_owned(),
        source: "openocd".to_owned(),
        script: "./build.sh".to_owned(),
        install_dir: Utf8PathBuf::from("openocd-install"),
        binary: Utf8PathBuf::from("bin/openocd.exe"),
        version_args: vec!["--version".to_owned()],
        version_pattern: r"Debugger (\S+)".to_owned(),
        sign: Vec::new(),
        extra_roots: vec![ExtraRootSpec {
            root: Utf8PathBuf::from("drivers"),
            subpath: "udev".to_owned(),
        }],
    };

    let job = tool_job(&executor, &build, &build_dir, "probe-user").expect("job built");

    assert_eq!(job.output_archive_name, "openocd-0.12.0-probe-user.zip");
    assert_eq!(
        job.extra_roots,
        vec![ExtraRoot {
            root: build_dir.join("drivers").into_std_path_buf(),
            subpath: "udev".to_owned(),
        }]
    );
    executor.assert_finished();
}

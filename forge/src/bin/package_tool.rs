//! Standalone packaging binary.
//!
//! Thin CLI over [`probe_forge::packaging`] that archives an arbitrary
//! directory with the same naming rules the pipeline uses, so a release
//! workflow can package a tool without running the whole pipeline.

use clap::Parser;
use probe_forge::config::Compression;
use probe_forge::exec::SystemCommandExecutor;
use probe_forge::output::write_stderr_line;
use probe_forge::packaging::{ExtraRoot, PackageJob, Packager, PackagingError, archive_name};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Package a directory into `<tool>-<version>-<suffix>.zip`.
#[derive(Parser, Debug)]
#[command(name = "probe-forge-package")]
#[command(about = "Package a built tool directory into a zip archive")]
struct PackageCli {
    /// Tool name used as the archive prefix.
    #[arg(long)]
    tool: String,

    /// Tool version; anything from the first `-` on is dropped.
    #[arg(long = "version", value_name = "VERSION")]
    tool_version: String,

    /// Archive suffix, usually the configuration name.
    #[arg(long)]
    suffix: String,

    /// Archive compression.
    #[arg(short, long, value_enum, default_value_t = Compression::Zlib)]
    compression: Compression,

    /// Directory where the archive is written.
    #[arg(long)]
    output_dir: PathBuf,

    /// Extra content as `ROOT:SUBPATH`; `ROOT/SUBPATH` is stored under `SUBPATH`.
    #[arg(long, value_name = "ROOT:SUBPATH", value_parser = parse_extra_root)]
    extra: Vec<ExtraRoot>,

    /// Directory whose contents form the archive root.
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
}

/// Errors returned by the packaging CLI.
#[derive(Debug, Error)]
enum PackageCliError {
    /// Archive creation failed.
    #[error("{0}")]
    Packaging(#[from] PackagingError),

    /// Writing the result line failed.
    #[error("could not report result: {0}")]
    Io(#[from] io::Error),
}

fn parse_extra_root(value: &str) -> Result<ExtraRoot, String> {
    match value.rsplit_once(':') {
        Some((root, subpath)) if !root.is_empty() && !subpath.is_empty() => Ok(ExtraRoot {
            root: PathBuf::from(root),
            subpath: subpath.to_owned(),
        }),
        _ => Err(format!("expected ROOT:SUBPATH, got `{value}`")),
    }
}

fn main() {
    let cli = PackageCli::parse();
    let mut stdout = io::stdout();
    if let Err(err) = run(cli, &mut stdout) {
        write_stderr_line(&mut io::stderr(), format!("error: {err}"));
        std::process::exit(1);
    }
}

/// Package the source directory and report the archive path on `stdout`.
fn run(cli: PackageCli, stdout: &mut dyn Write) -> Result<(), PackageCliError> {
    std::fs::create_dir_all(&cli.output_dir).map_err(PackagingError::from)?;
    let job = PackageJob {
        output_archive_name: archive_name(&cli.tool, &cli.tool_version, &cli.suffix),
        tool_name: cli.tool,
        source_directory: cli.source,
        extra_roots: cli.extra,
    };

    let executor = SystemCommandExecutor;
    let archive = Packager::new(cli.compression, &executor).package(&job, &cli.output_dir)?;
    writeln!(stdout, "Created {}", archive.display())?;
    Ok(())
}

//! probe-forge CLI entrypoint.
//!
//! Runs the fetch, bootstrap, build, sign, and package pipeline described by
//! a configuration file and reports the archives it produced.

use clap::Parser;
use probe_forge::cli::Cli;
use probe_forge::error::Result;
use probe_forge::exec::SystemCommandExecutor;
use probe_forge::fetch::download::HttpDownloader;
use probe_forge::fetch::extraction::NativeExtractor;
use probe_forge::output::{success_message, write_stderr_line};
use probe_forge::pipeline::{self, Collaborators};
use probe_forge::signing::PowerShellSigning;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    let mut stderr = io::stderr();
    let run_result = run(&cli, &mut stderr);
    let exit_code = exit_code_for_run_result(run_result, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

/// Route `log` records to stderr, filtered by `RUST_LOG` or the CLI flags.
fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .is_err()
    {
        // A subscriber is already installed.
    }
}

fn run(cli: &Cli, stderr: &mut dyn Write) -> Result<()> {
    let executor = SystemCommandExecutor;
    let downloader = HttpDownloader;
    let extractor = NativeExtractor::new(&executor);
    let signing = PowerShellSigning::new(&executor);
    let collaborators = Collaborators {
        executor: &executor,
        downloader: &downloader,
        extractor: &extractor,
        certificates: &signing,
        signature_tool: &signing,
    };

    let mut sink = io::sink();
    let progress: &mut dyn Write = if cli.quiet { &mut sink } else { &mut *stderr };
    let report = pipeline::run(&cli.to_run_options(), collaborators, progress)?;

    if !cli.quiet {
        write_stderr_line(stderr, "");
        write_stderr_line(stderr, success_message(&report.archives));
    }
    Ok(())
}

fn exit_code_for_run_result(result: Result<()>, stderr: &mut dyn Write) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            write_stderr_line(stderr, format!("error: {err}"));
            1
        }
    }
}

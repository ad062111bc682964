//! CLI argument definitions for probe-forge.
//!
//! Kept apart from the entrypoint so parsing can be unit tested and the
//! binary stays focused on orchestration.

use crate::config::{BuildType, Compression, RunOptions};
use camino::Utf8PathBuf;
use clap::Parser;

/// Fetch, build, sign, and package a debug-probe toolchain.
#[derive(Parser, Debug, Clone)]
#[command(name = "probe-forge")]
#[command(version, about)]
#[command(long_about = concat!(
    "Fetch, build, sign, and package a debug-probe toolchain.\n\n",
    "Reads a configuration file describing downloads, archives, and git ",
    "repositories, fetches them below the build root, provisions the ",
    "MSYS2-style build environment, builds each configured tool, signs the ",
    "results, and writes one zip archive per tool plus an aggregate archive ",
    "to <build-root>/bin.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Full run:\n",
    "    $ probe-forge configs/probe.toml\n\n",
    "  Rebuild from earlier fetches without signing:\n",
    "    $ probe-forge configs/probe.toml --skip-download --skip-signing\n\n",
    "  Per-user LZMA archives:\n",
    "    $ probe-forge configs/probe.toml --build-type user --compression lzma",
))]
pub struct Cli {
    /// Primary configuration file (TOML, or JSON by extension).
    #[arg(value_name = "CONFIG")]
    pub config: Utf8PathBuf,

    /// Directory receiving `build/`, `downloads/`, and `bin/`.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub build_root: Utf8PathBuf,

    /// Verify earlier fetches instead of downloading, and skip the bootstrap.
    #[arg(long)]
    pub skip_download: bool,

    /// Leave build outputs unsigned.
    #[arg(long)]
    pub skip_signing: bool,

    /// Archive compression.
    #[arg(short, long, value_enum, default_value_t = Compression::Zlib)]
    pub compression: Compression,

    /// Installation scope the tools are built for.
    #[arg(long, value_enum, default_value_t = BuildType::System)]
    pub build_type: BuildType,

    /// Increase log verbosity (repeatable: -v, -vv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

impl Cli {
    /// Translate the parsed arguments into pipeline options.
    ///
    /// # Examples
    ///
    /// ```
    /// use clap::Parser;
    /// use probe_forge::cli::Cli;
    ///
    /// let cli = Cli::parse_from(["probe-forge", "probe.toml", "--skip-signing"]);
    /// let options = cli.to_run_options();
    /// assert!(options.skip_signing);
    /// assert_eq!(options.build_root, ".");
    /// ```
    #[must_use]
    pub fn to_run_options(&self) -> RunOptions {
        RunOptions {
            config_path: self.config.clone(),
            build_root: self.build_root.clone(),
            skip_download: self.skip_download,
            skip_signing: self.skip_signing,
            compression: self.compression,
            build_type: self.build_type,
        }
    }

    /// The log filter directive matching `-v`/`-q`.
    #[must_use]
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;

//! probe-forge library.
//!
//! This crate fetches third-party artifacts, provisions an MSYS2-style build
//! environment, builds the debug-probe tools from source, signs the results,
//! and packages each tool into a distributable archive. It backs the
//! `probe-forge` CLI binary and can be driven programmatically for testing.
//!
//! # Modules
//!
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - Configuration files, build context, and output layout
//! - [`error`] - Semantic error types
//! - [`exec`] - External command invocation abstraction
//! - [`fetch`] - Downloads, archive extraction, and repository clones
//! - [`gate`] - Sentinel-based stage skipping
//! - [`invoker`] - Build environment bootstrap and tool builds
//! - [`output`] - Human-facing progress output
//! - [`packaging`] - Archive naming and creation
//! - [`pipeline`] - End-to-end orchestration
//! - [`registry`] - Artifact descriptor loading and validation
//! - [`signing`] - Code signing of build outputs
//! - [`version`] - Version extraction for artifacts and tools

pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod gate;
pub mod invoker;
pub mod output;
pub mod packaging;
pub mod pipeline;
pub mod registry;
pub mod signing;
pub mod version;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

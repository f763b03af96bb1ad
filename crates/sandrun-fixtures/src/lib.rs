//! Test utilities and fixtures for sandrun integration tests.
//!
//! - [`ConfigBuilder`] - Fluent API for constructing test configurations,
//!   and for turning them into `sandrun` command-line flags
//! - [`temp_dir`] - Create self-deleting temporary directories
//! - [`write_tarball`] - Build a `.tar.gz` install source
//! - [`workspaces_in`] / [`archives_in`] - Inspect a temp-dir root after a run
//!
//! # Example
//!
//! ```ignore
//! use sandrun_fixtures::{temp_dir, write_tarball, ConfigBuilder};
//!
//! let root = temp_dir("install");
//! let package = write_tarball(root.path(), "pkg.tar.gz", &[("x", "payload")]);
//! let config = ConfigBuilder::test_default(root.path())
//!     .with_install_package(format!("file://{}", package.display()))
//!     .build();
//! ```

// Test fixtures crate - relaxed lints for test utilities
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod builders;
pub mod helpers;

pub use builders::ConfigBuilder;
pub use helpers::{archives_in, read_summary, temp_dir, workspaces_in, write_tarball};

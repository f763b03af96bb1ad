//! Fluent builder for [`SandboxConfig`] in tests.
//!
//! The same builder feeds library tests (via [`ConfigBuilder::build`]) and
//! CLI tests (via [`ConfigBuilder::to_args`]), so both exercise identical
//! settings.
//!
//! # Example
//!
//! ```ignore
//! use sandrun_fixtures::{temp_dir, ConfigBuilder};
//!
//! let root = temp_dir("example");
//! let config = ConfigBuilder::test_default(root.path())
//!     .with_tag("example")
//!     .tarball_if_fail()
//!     .build();
//! ```

use std::path::{Path, PathBuf};

use sandrun::{SandboxConfig, WorkspaceSource};

/// Fluent builder for [`SandboxConfig`].
///
/// Starts with test-friendly defaults: workspaces under the given root, tag
/// `test`, and no install jitter so tests do not sleep.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: SandboxConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub fn test_default(temp_root: &Path) -> Self {
        Self {
            config: SandboxConfig {
                temp_dir: temp_root.to_path_buf(),
                tag: "test".to_string(),
                install_jitter_ms: 0,
                ..SandboxConfig::default()
            },
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.config.tag = tag.to_string();
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace = WorkspaceSource::Explicit { path: path.into() };
        self
    }

    #[must_use]
    pub fn debug(mut self) -> Self {
        self.config.debug = true;
        self
    }

    #[must_use]
    pub fn echo_stdout(mut self) -> Self {
        self.config.echo_stdout = true;
        self
    }

    #[must_use]
    pub fn random_nice(mut self) -> Self {
        self.config.random_nice = true;
        self
    }

    #[must_use]
    pub fn tarball_if_fail(mut self) -> Self {
        self.config.tarball_if_fail = true;
        self
    }

    #[must_use]
    pub fn with_disk_fill_threshold(mut self, threshold: u8) -> Self {
        self.config.disk_fill_threshold = Some(threshold);
        self
    }

    #[must_use]
    pub fn with_install_package(mut self, uri: impl Into<String>) -> Self {
        self.config.install_package = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_stdout_copy_path(mut self, uri: impl Into<String>) -> Self {
        self.config.stdout_copy_path = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_stderr_copy_path(mut self, uri: impl Into<String>) -> Self {
        self.config.stderr_copy_path = Some(uri.into());
        self
    }

    #[must_use]
    pub fn with_content_store(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.content_store_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn build(self) -> SandboxConfig {
        self.config
    }

    /// Equivalent `sandrun` flags, to be followed by the command string.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let config = &self.config;
        let mut args = vec![
            format!("--temp-dir={}", config.temp_dir.display()),
            format!("--tag={}", config.tag),
            format!("--install-jitter-ms={}", config.install_jitter_ms),
        ];
        if let WorkspaceSource::Explicit { path } = &config.workspace {
            args.push(format!("--working-dir={}", path.display()));
        }
        let flags = [
            (config.debug, "--debug"),
            (config.echo_stdout, "--echo-stdout"),
            (config.random_nice, "--random-nice"),
            (config.tarball_if_fail, "--tarball-if-fail"),
        ];
        args.extend(
            flags
                .into_iter()
                .filter(|(set, _)| *set)
                .map(|(_, flag)| flag.to_string()),
        );
        if let Some(threshold) = config.disk_fill_threshold {
            args.push(format!("--fail-if-disk-full-above={threshold}"));
        }
        if let Some(uri) = &config.install_package {
            args.push(format!("--install-package={uri}"));
        }
        if let Some(uri) = &config.stdout_copy_path {
            args.push(format!("--stdout-copy-path={uri}"));
        }
        if let Some(uri) = &config.stderr_copy_path {
            args.push(format!("--stderr-copy-path={uri}"));
        }
        if let Some(root) = &config.content_store_root {
            args.push(format!("--content-store-root={}", root.display()));
        }
        args
    }
}

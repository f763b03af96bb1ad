use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runner::{RunnerError, RunnerResult};
use crate::transport::Transport;

/// Prefix shared by generated workspace directories and failure archives.
pub const WORKSPACE_PREFIX: &str = "sandrun";

/// Tag used when the caller does not supply one.
pub const DEFAULT_TAG: &str = "run";

/// Default upper bound of the pre-install jitter sleep.
pub const DEFAULT_INSTALL_JITTER_MS: u64 = 1000;

/// Highest accepted disk-fill threshold (percent).
pub const MAX_DISK_FILL_THRESHOLD: u8 = 99;

/// Where the workspace directory comes from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorkspaceSource {
    /// A fresh, uniquely named directory under the temp-dir root.
    #[default]
    Generated,
    /// A caller-supplied directory. Created if missing, never deleted.
    Explicit {
        /// Absolute path of the directory.
        path: PathBuf,
    },
}

/// Immutable configuration resolved once at startup.
///
/// Every component receives this by reference; nothing reads ambient process
/// state for its options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Root under which generated workspaces and failure archives are placed.
    pub temp_dir: PathBuf,
    /// Generated or caller-supplied workspace.
    pub workspace: WorkspaceSource,
    /// Identification suffix embedded in workspace and archive names.
    pub tag: String,
    /// Keep the workspace regardless of outcome.
    pub debug: bool,
    /// Install-source URI fetched into the workspace before the chain runs.
    pub install_package: Option<String>,
    /// Print captured stdout to the caller when the chain succeeds.
    pub echo_stdout: bool,
    /// Run each command under a random niceness.
    pub random_nice: bool,
    /// Refuse to start when the target filesystem is fuller than this percentage.
    pub disk_fill_threshold: Option<u8>,
    /// Archive the workspace when the chain fails.
    pub tarball_if_fail: bool,
    /// Destination URI for the captured stdout.
    pub stdout_copy_path: Option<String>,
    /// Destination URI for the captured stderr.
    pub stderr_copy_path: Option<String>,
    /// Root directory of the content store backing `cas://` URIs.
    pub content_store_root: Option<PathBuf>,
    /// Upper bound of the jitter sleep before installing, in milliseconds.
    pub install_jitter_ms: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            workspace: WorkspaceSource::Generated,
            tag: DEFAULT_TAG.to_string(),
            debug: false,
            install_package: None,
            echo_stdout: false,
            random_nice: false,
            disk_fill_threshold: None,
            tarball_if_fail: false,
            stdout_copy_path: None,
            stderr_copy_path: None,
            content_store_root: None,
            install_jitter_ms: DEFAULT_INSTALL_JITTER_MS,
        }
    }
}

impl SandboxConfig {
    /// Check the invariants that cannot be expressed in the types.
    pub fn validate(&self) -> RunnerResult<()> {
        if let Some(threshold) = self.disk_fill_threshold {
            if threshold > MAX_DISK_FILL_THRESHOLD {
                return Err(RunnerError::usage_with_context(
                    "disk-fill threshold must be between 0 and 99",
                    serde_json::json!({"threshold": threshold}),
                ));
            }
        }
        if self.tag.is_empty() {
            return Err(RunnerError::usage("tag must not be empty"));
        }
        if self
            .tag
            .chars()
            .any(|ch| ch == '/' || ch == '\\' || ch.is_whitespace() || ch.is_control())
        {
            return Err(RunnerError::usage_with_context(
                "tag must not contain path separators or whitespace",
                serde_json::json!({"tag": self.tag}),
            ));
        }
        if !self.temp_dir.is_absolute() {
            return Err(RunnerError::usage_with_context(
                "temp dir must be an absolute path",
                serde_json::json!({"temp_dir": self.temp_dir}),
            ));
        }
        if let WorkspaceSource::Explicit { path } = &self.workspace {
            if !path.is_absolute() {
                return Err(RunnerError::usage_with_context(
                    "working directory must be an absolute path",
                    serde_json::json!({"working_dir": path}),
                ));
            }
        }
        let uris = [
            ("install_package", &self.install_package),
            ("stdout_copy_path", &self.stdout_copy_path),
            ("stderr_copy_path", &self.stderr_copy_path),
        ];
        for (option, uri) in uris {
            let Some(uri) = uri else { continue };
            if Transport::parse(uri).is_some_and(|transport| transport.is_relative_local()) {
                return Err(RunnerError::usage_with_context(
                    "file:// URIs must carry an absolute path",
                    serde_json::json!({"option": option, "uri": uri}),
                ));
            }
        }
        Ok(())
    }

    /// Whether the workspace was supplied by the caller.
    #[must_use]
    pub fn is_explicit_workspace(&self) -> bool {
        matches!(self.workspace, WorkspaceSource::Explicit { .. })
    }

    /// Release behaviour derived from this configuration.
    #[must_use]
    pub fn release_policy(&self) -> ReleasePolicy {
        ReleasePolicy {
            debug: self.debug,
            archive_on_failure: self.tarball_if_fail,
        }
    }
}

/// What happens to the workspace once the run is over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReleasePolicy {
    /// Never delete.
    pub debug: bool,
    /// Compress the workspace into an archive when the run failed.
    pub archive_on_failure: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::runner::ErrorCode;

    #[test]
    fn default_config_is_valid() {
        assert!(SandboxConfig::default().validate().is_ok());
    }

    #[test]
    fn threshold_above_99_is_rejected() {
        let config = SandboxConfig {
            disk_fill_threshold: Some(100),
            ..SandboxConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::Usage);
    }

    #[test]
    fn tag_with_separator_is_rejected() {
        let config = SandboxConfig {
            tag: "a/b".to_string(),
            ..SandboxConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn relative_working_dir_is_rejected() {
        let config = SandboxConfig {
            workspace: WorkspaceSource::Explicit {
                path: PathBuf::from("relative/dir"),
            },
            ..SandboxConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn relative_file_uris_are_rejected() {
        let relay = SandboxConfig {
            stdout_copy_path: Some("file://relayed-out.txt".to_string()),
            ..SandboxConfig::default()
        };
        let err = relay.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::Usage);

        let install = SandboxConfig {
            install_package: Some("file://pkg.tgz".to_string()),
            ..SandboxConfig::default()
        };
        assert_eq!(install.validate().unwrap_err().code, ErrorCode::Usage);

        let absolute = SandboxConfig {
            stderr_copy_path: Some("file:///tmp/err.txt".to_string()),
            install_package: Some("host:pkg.tgz".to_string()),
            ..SandboxConfig::default()
        };
        assert!(absolute.validate().is_ok());
    }

    #[test]
    fn release_policy_mirrors_flags() {
        let config = SandboxConfig {
            debug: true,
            tarball_if_fail: true,
            ..SandboxConfig::default()
        };
        let policy = config.release_policy();
        assert!(policy.debug);
        assert!(policy.archive_on_failure);
    }
}

//! Workspace lifecycle: disk-fill precondition, creation, scoped entry and
//! release (delete, archive or retain).

pub mod archive;

use crate::model::{ReleasePolicy, RunId, SandboxConfig, WorkspaceSource, WORKSPACE_PREFIX};
use crate::runner::{ErrorCode, RunnerError, RunnerResult};
use nix::sys::statvfs::statvfs;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Literal command lines, one per attempted step.
pub const COMMAND_LOG: &str = "command.log";
/// Captured stdout of the chain.
pub const STDOUT_CAPTURE: &str = "stdout.log";
/// Captured stderr of the chain.
pub const STDERR_CAPTURE: &str = "stderr.log";
/// Postmortem summary of the run.
pub const RUN_SUMMARY: &str = "run.json";

/// A directory that is the sandbox for one invocation.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    temp_root: PathBuf,
    tag: String,
    suffix: String,
    caller_supplied: bool,
}

/// What `release` did with the workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Left on disk.
    Retained { path: PathBuf, reason: RetainReason },
    /// Removed.
    Deleted { path: PathBuf },
    /// Compressed into `archive`; the original is removed unless caller-supplied.
    Archived {
        path: PathBuf,
        archive: PathBuf,
        original_removed: bool,
    },
    /// Best-effort cleanup failed; the error was logged.
    CleanupFailed { path: PathBuf, message: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetainReason {
    Debug,
    CallerSupplied,
}

impl Workspace {
    /// Create (or adopt) the workspace for this run.
    ///
    /// The disk-fill precondition is evaluated first; when it fails nothing is
    /// created.
    pub fn acquire(config: &SandboxConfig, run_id: RunId) -> RunnerResult<Self> {
        let suffix = format!("{}-{}", std::process::id(), run_id.short());
        match &config.workspace {
            WorkspaceSource::Explicit { path } => {
                if let Some(threshold) = config.disk_fill_threshold {
                    check_disk_fill(path, threshold)?;
                }
                fs::create_dir_all(path)
                    .map_err(|err| RunnerError::workspace("failed to create working dir", err))?;
                let path = fs::canonicalize(path)
                    .map_err(|err| RunnerError::workspace("failed to resolve working dir", err))?;
                debug!(workspace = %path.display(), "using caller-supplied workspace");
                Ok(Self {
                    path,
                    temp_root: config.temp_dir.clone(),
                    tag: config.tag.clone(),
                    suffix,
                    caller_supplied: true,
                })
            }
            WorkspaceSource::Generated => {
                if let Some(threshold) = config.disk_fill_threshold {
                    check_disk_fill(&config.temp_dir, threshold)?;
                }
                fs::create_dir_all(&config.temp_dir)
                    .map_err(|err| RunnerError::workspace("failed to create temp dir", err))?;
                let name = format!("{WORKSPACE_PREFIX}-{}-{suffix}", config.tag);
                let path = config.temp_dir.join(name);
                // create_dir, not create_dir_all: an existing directory means a
                // name collision and must not be shared.
                fs::create_dir(&path).map_err(|err| {
                    RunnerError::new(
                        ErrorCode::Workspace,
                        "failed to create workspace",
                        serde_json::json!({
                            "path": path.display().to_string(),
                            "source": err.to_string(),
                        }),
                    )
                })?;
                let path = fs::canonicalize(&path)
                    .map_err(|err| RunnerError::workspace("failed to resolve workspace", err))?;
                debug!(workspace = %path.display(), "created workspace");
                Ok(Self {
                    path,
                    temp_root: config.temp_dir.clone(),
                    tag: config.tag.clone(),
                    suffix,
                    caller_supplied: false,
                })
            }
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_caller_supplied(&self) -> bool {
        self.caller_supplied
    }

    #[must_use]
    pub fn command_log_path(&self) -> PathBuf {
        self.path.join(COMMAND_LOG)
    }

    #[must_use]
    pub fn stdout_path(&self) -> PathBuf {
        self.path.join(STDOUT_CAPTURE)
    }

    #[must_use]
    pub fn stderr_path(&self) -> PathBuf {
        self.path.join(STDERR_CAPTURE)
    }

    #[must_use]
    pub fn summary_path(&self) -> PathBuf {
        self.path.join(RUN_SUMMARY)
    }

    /// Where a failure archive of this workspace is written.
    #[must_use]
    pub fn archive_path(&self) -> PathBuf {
        self.temp_root.join(format!(
            "{WORKSPACE_PREFIX}-failed_{}-{}.tar.gz",
            self.tag, self.suffix
        ))
    }

    /// Make the workspace the process working directory until the guard drops.
    pub fn enter(&self) -> RunnerResult<CwdGuard> {
        CwdGuard::enter(&self.path)
    }

    /// Dispose of the workspace. Never fails: cleanup errors are logged.
    pub fn release(self, failed: bool, policy: ReleasePolicy) -> ReleaseOutcome {
        if policy.debug {
            info!(workspace = %self.path.display(), "debug set, keeping workspace");
            return ReleaseOutcome::Retained {
                path: self.path,
                reason: RetainReason::Debug,
            };
        }

        if failed && policy.archive_on_failure {
            return self.archive_and_remove();
        }

        if self.caller_supplied {
            debug!(workspace = %self.path.display(), "keeping caller-supplied workspace");
            return ReleaseOutcome::Retained {
                path: self.path,
                reason: RetainReason::CallerSupplied,
            };
        }

        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!(workspace = %self.path.display(), "removed workspace");
                ReleaseOutcome::Deleted { path: self.path }
            }
            Err(err) => cleanup_failed(self.path, "failed to remove workspace", &err),
        }
    }

    fn archive_and_remove(self) -> ReleaseOutcome {
        let archive = self.archive_path();
        if let Err(err) = archive::archive_directory(&self.path, &archive) {
            return cleanup_failed(self.path, "failed to archive workspace", &err);
        }
        warn!(
            host = %archive::hostname(),
            archive = %archive.display(),
            "command chain failed; workspace archived"
        );

        if self.caller_supplied {
            return ReleaseOutcome::Archived {
                path: self.path,
                archive,
                original_removed: false,
            };
        }
        match fs::remove_dir_all(&self.path) {
            Ok(()) => ReleaseOutcome::Archived {
                path: self.path,
                archive,
                original_removed: true,
            },
            Err(err) => cleanup_failed(self.path, "failed to remove archived workspace", &err),
        }
    }
}

fn cleanup_failed(path: PathBuf, message: &str, err: &dyn std::fmt::Display) -> ReleaseOutcome {
    warn!(workspace = %path.display(), error = %err, "{message}");
    ReleaseOutcome::CleanupFailed {
        path,
        message: format!("{message}: {err}"),
    }
}

/// Restores the previous working directory when dropped.
#[derive(Debug)]
pub struct CwdGuard {
    previous: Option<PathBuf>,
}

impl CwdGuard {
    pub fn enter(dir: &Path) -> RunnerResult<Self> {
        // The previous directory may already be gone; then there is nothing
        // to restore.
        let previous = std::env::current_dir().ok();
        std::env::set_current_dir(dir)
            .map_err(|err| RunnerError::workspace("failed to enter workspace", err))?;
        Ok(Self { previous })
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if let Err(err) = std::env::set_current_dir(&previous) {
                warn!(dir = %previous.display(), error = %err, "failed to restore working directory");
            }
        }
    }
}

/// Percentage of the filesystem holding `path` that is in use, rounded up
/// the way `df` reports it.
pub fn filesystem_usage_percent(path: &Path) -> RunnerResult<u8> {
    let probe = existing_ancestor(path);
    let stat = statvfs(probe.as_path()).map_err(|errno| {
        RunnerError::new(
            ErrorCode::Precondition,
            "failed to query filesystem usage",
            serde_json::json!({
                "path": probe.display().to_string(),
                "source": errno.to_string(),
            }),
        )
    })?;
    #[allow(clippy::useless_conversion)] // block counts are u32 on some targets
    let (blocks, free, available) = (
        u64::from(stat.blocks()),
        u64::from(stat.blocks_free()),
        u64::from(stat.blocks_available()),
    );
    Ok(usage_percent(blocks, free, available))
}

fn usage_percent(blocks: u64, free: u64, available: u64) -> u8 {
    let used = blocks.saturating_sub(free);
    let denominator = used.saturating_add(available);
    if denominator == 0 {
        return 0;
    }
    let percent = used.saturating_mul(100).div_ceil(denominator).min(100);
    u8::try_from(percent).unwrap_or(100)
}

/// Fail when the filesystem holding `path` is more than `threshold` percent full.
pub fn check_disk_fill(path: &Path, threshold: u8) -> RunnerResult<u8> {
    let usage = filesystem_usage_percent(path)?;
    if usage > threshold {
        return Err(RunnerError::precondition(
            "filesystem usage exceeds the disk-fill threshold",
            serde_json::json!({
                "path": path.display().to_string(),
                "usage_percent": usage,
                "threshold_percent": threshold,
            }),
        ));
    }
    debug!(path = %path.display(), usage, threshold, "disk-fill precondition satisfied");
    Ok(usage)
}

fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

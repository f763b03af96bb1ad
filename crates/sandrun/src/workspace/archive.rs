use crate::runner::{ErrorCode, RunnerError, RunnerResult};
use std::path::Path;
use std::process::{Command, Stdio};

/// Host `tar`, used for both failure archives and package extraction.
pub const TAR_PROGRAM: &str = "tar";

/// Compress `dir` into a gzip tarball at `archive`. The tarball holds a
/// single top-level entry named after the directory.
pub fn archive_directory(dir: &Path, archive: &Path) -> RunnerResult<()> {
    let parent = dir
        .parent()
        .ok_or_else(|| RunnerError::internal("workspace has no parent directory"))?;
    let name = dir
        .file_name()
        .ok_or_else(|| RunnerError::internal("workspace has no directory name"))?;

    let mut command = Command::new(TAR_PROGRAM);
    command
        .arg("-czf")
        .arg(archive)
        .arg("-C")
        .arg(parent)
        .arg(name);
    run_tar(command, "failed to archive workspace")
}

/// Extract a gzip tarball into `dest`.
pub fn extract_tarball(archive: &Path, dest: &Path) -> RunnerResult<()> {
    let mut command = Command::new(TAR_PROGRAM);
    command.arg("-xzf").arg(archive).arg("-C").arg(dest);
    run_tar(command, "failed to extract package")
}

fn run_tar(mut command: Command, message: &str) -> RunnerResult<()> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| RunnerError::io(ErrorCode::Io, format!("{message}: cannot run tar"), err))?;
    if output.status.success() {
        return Ok(());
    }
    Err(RunnerError::new(
        ErrorCode::Io,
        message,
        serde_json::json!({
            "exit_code": output.status.code(),
            "stderr": String::from_utf8_lossy(&output.stderr).trim(),
        }),
    ))
}

/// Name of this host for operator notifications.
pub fn hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

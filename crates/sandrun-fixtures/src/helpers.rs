//! Common test helper functions.
//!
//! These utilities reduce boilerplate in integration tests: temp-dir roots,
//! tarball install sources and inspection of what a run left behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use sandrun::WORKSPACE_PREFIX;
use tempfile::TempDir;

/// Create a temporary directory that is removed when dropped.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
pub fn temp_dir(prefix: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("sandrun-test-{prefix}-"))
        .tempdir()
        .expect("failed to create temp directory")
}

/// Write `files` (name, contents) into a gzip tarball `dir/name`.
///
/// Entries are stored at the top level of the archive, so extracting into a
/// workspace yields `workspace/<name>` for every file.
///
/// # Panics
///
/// Panics if staging the files or running `tar` fails.
pub fn write_tarball(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let staging = tempfile::tempdir_in(dir).expect("failed to create staging directory");
    for (file, contents) in files {
        let path = staging.path().join(file);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create staging subdirectory");
        }
        fs::write(path, contents).expect("failed to stage tarball entry");
    }

    let archive = dir.join(name);
    let status = Command::new("tar")
        .arg("-czf")
        .arg(&archive)
        .arg("-C")
        .arg(staging.path())
        .args(files.iter().map(|(file, _)| file))
        .status()
        .expect("failed to run tar");
    assert!(status.success(), "tar exited with {status}");
    archive
}

/// Generated workspaces for `tag` still present under `root`.
#[must_use]
pub fn workspaces_in(root: &Path, tag: &str) -> Vec<PathBuf> {
    entries_with_prefix(root, &format!("{WORKSPACE_PREFIX}-{tag}-"))
}

/// Failure archives for `tag` under `root`.
#[must_use]
pub fn archives_in(root: &Path, tag: &str) -> Vec<PathBuf> {
    entries_with_prefix(root, &format!("{WORKSPACE_PREFIX}-failed_{tag}-"))
}

fn entries_with_prefix(root: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect();
    found.sort();
    found
}

/// Parse the `run.json` summary left in `workspace`.
///
/// # Panics
///
/// Panics if the summary is missing or not valid JSON.
#[must_use]
pub fn read_summary(workspace: &Path) -> serde_json::Value {
    let data = fs::read(workspace.join(sandrun::workspace::RUN_SUMMARY))
        .expect("failed to read run summary");
    serde_json::from_slice(&data).expect("run summary is not valid JSON")
}

//! `host:path` installs and relays, with `scp` replaced by a local stub.
// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};

use sandrun_fixtures::{temp_dir, workspaces_in, write_tarball, ConfigBuilder};

/// Drops the `-q -B` flags, strips `host:` from either side and copies.
const COPYING_SCP: &str = r#"#!/bin/sh
shift 2
from="${1#*:}"
to="${2#*:}"
exec cp "$from" "$to"
"#;

const FAILING_SCP: &str = r#"#!/bin/sh
echo "ssh: connect to host build-host port 22: Connection refused" >&2
exit 1
"#;

fn install_stub_scp(dir: &Path, script: &str) {
    let bin = dir.join("bin");
    fs::create_dir_all(&bin).unwrap();
    let scp = bin.join("scp");
    fs::write(&scp, script).unwrap();
    fs::set_permissions(&scp, fs::Permissions::from_mode(0o755)).unwrap();
}

fn run_with_stub(root: &Path, args: &[String], chain: &str) -> Output {
    let path = std::env::var("PATH").unwrap_or_default();
    Command::new(env!("CARGO_BIN_EXE_sandrun"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env("PATH", format!("{}:{path}", root.join("bin").display()))
        .args(args)
        .arg(chain)
        .output()
        .expect("failed to execute sandrun")
}

#[test]
fn remote_install_extracts_into_the_workspace() {
    let root = temp_dir("remote-install");
    install_stub_scp(root.path(), COPYING_SCP);
    let package = write_tarball(root.path(), "pkg.tgz", &[("x", "from remote")]);

    let args = ConfigBuilder::test_default(root.path())
        .echo_stdout()
        .with_install_package(format!("build-host:{}", package.display()))
        .to_args();
    let output = run_with_stub(root.path(), &args, "cat x; test -f pkg.tgz");
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout), "from remote");
}

#[test]
fn remote_install_failure_exits_1() {
    let root = temp_dir("remote-install-fail");
    install_stub_scp(root.path(), FAILING_SCP);
    let marker = root.path().join("ran");

    let args = ConfigBuilder::test_default(root.path())
        .with_install_package("build-host:/srv/pkg.tgz")
        .to_args();
    let output = run_with_stub(root.path(), &args, &format!("touch {}", marker.display()));
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("E_INSTALL"), "stderr: {stderr}");
    assert!(!marker.exists());
    assert!(workspaces_in(root.path(), "test").is_empty());
}

#[test]
fn remote_relay_pushes_the_capture() {
    let root = temp_dir("remote-relay");
    install_stub_scp(root.path(), COPYING_SCP);
    let dest = root.path().join("stdout.remote");

    let args = ConfigBuilder::test_default(root.path())
        .with_stdout_copy_path(format!("build-host:{}", dest.display()))
        .to_args();
    let output = run_with_stub(root.path(), &args, "echo shipped");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(fs::read_to_string(dest).unwrap(), "shipped\n");
}

#[test]
fn remote_relay_failure_warns_and_keeps_exit_code() {
    let root = temp_dir("remote-relay-fail");
    install_stub_scp(root.path(), FAILING_SCP);

    let args = ConfigBuilder::test_default(root.path())
        .echo_stdout()
        .with_stdout_copy_path("build-host:/srv/logs/stdout.log")
        .to_args();
    let output = run_with_stub(root.path(), &args, "echo kept");
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "kept\n");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("relay failed"), "stderr: {stderr}");
    assert!(stderr.contains("Connection refused"), "stderr: {stderr}");
}

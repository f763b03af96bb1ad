//! Package installation through each transport.
// Test module - relaxed lint rules
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use sandrun::install::Installer;
use sandrun::transport::{ContentStore, FsContentStore};
use sandrun::workspace::Workspace;
use sandrun::{ErrorCode, RunId};
use sandrun_fixtures::{temp_dir, write_tarball, ConfigBuilder};

fn workspace(root: &std::path::Path) -> Workspace {
    let config = ConfigBuilder::test_default(root).build();
    Workspace::acquire(&config, RunId::new()).unwrap()
}

#[test]
fn local_tarball_is_extracted_into_workspace() {
    let root = temp_dir("install-local");
    let package = write_tarball(root.path(), "pkg.tar.gz", &[("x", "payload")]);
    let ws = workspace(root.path());

    let report = Installer::new(None, Duration::ZERO)
        .install(&format!("file://{}", package.display()), &ws)
        .unwrap();
    assert!(report.extracted);
    assert_eq!(report.transport, "file");
    assert_eq!(report.local_file, package);
    assert_eq!(fs::read_to_string(ws.path().join("x")).unwrap(), "payload");
}

#[test]
fn non_tarball_is_left_in_place() {
    let root = temp_dir("install-plain");
    let file = root.path().join("tool.sh");
    fs::write(&file, "#!/bin/sh\n").unwrap();
    let ws = workspace(root.path());

    let report = Installer::new(None, Duration::ZERO)
        .install(&format!("file://{}", file.display()), &ws)
        .unwrap();
    assert!(!report.extracted);
    assert_eq!(report.local_file, file);
}

#[test]
fn content_store_object_is_fetched_then_extracted() {
    let root = temp_dir("install-cas");
    let package = write_tarball(root.path(), "tool.tgz", &[("bin/tool", "#!/bin/sh\n")]);
    let store = FsContentStore::new(root.path().join("store"));
    store.put(&package, "packages/tool.tgz").unwrap();
    let store: Arc<dyn ContentStore> = Arc::new(store);
    let ws = workspace(root.path());

    let report = Installer::new(Some(store), Duration::from_millis(2))
        .install("cas://packages/tool.tgz", &ws)
        .unwrap();
    assert!(report.extracted);
    assert_eq!(report.local_file, ws.path().join("tool.tgz"));
    assert!(ws.path().join("bin/tool").is_file());
}

#[test]
fn missing_content_store_object_fails() {
    let root = temp_dir("install-cas-missing");
    let store: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(root.path().join("store")));
    let ws = workspace(root.path());
    let err = Installer::new(Some(store), Duration::ZERO)
        .install("cas://packages/nope.tgz", &ws)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Install);
}

#[test]
fn unsupported_uri_fails_before_fetching() {
    let root = temp_dir("install-unsupported");
    let ws = workspace(root.path());
    for uri in ["https://example.com/pkg.tgz", "/abs/pkg.tgz", "pkg.tgz"] {
        let err = Installer::new(None, Duration::ZERO)
            .install(uri, &ws)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Install, "uri {uri}");
    }
}

#[test]
fn missing_local_file_fails() {
    let root = temp_dir("install-missing");
    let ws = workspace(root.path());
    let uri = format!("file://{}", root.path().join("absent.tgz").display());
    let err = Installer::new(None, Duration::ZERO)
        .install(&uri, &ws)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Install);
}

#[test]
fn corrupt_tarball_is_fatal() {
    let root = temp_dir("install-corrupt");
    let bogus = root.path().join("broken.tar.gz");
    fs::write(&bogus, "definitely not gzip").unwrap();
    let ws = workspace(root.path());
    let err = Installer::new(None, Duration::ZERO)
        .install(&format!("file://{}", bogus.display()), &ws)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Install);
}

//! Package installer: resolve an install-source URI into a local file inside
//! (or visible to) the workspace and unpack it when it is a tarball.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::runner::{RunnerError, RunnerResult};
use crate::transport::{ContentStore, Transport, TransportError};
use crate::workspace::archive::extract_tarball;
use crate::workspace::Workspace;

/// File-name suffixes treated as gzip-compressed tarballs.
pub const TARBALL_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];

/// Whether `path` names a gzip-compressed tarball.
#[must_use]
pub fn is_tarball(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| TARBALL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}

/// Random delay drawn uniformly from `[0, max)`.
#[must_use]
pub fn jitter_delay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

/// What an install did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReport {
    /// The install-source URI as given.
    pub source: String,
    /// Transport that served it (`cas`, `file` or `scp`).
    pub transport: String,
    /// The resolved local file.
    pub local_file: PathBuf,
    /// Whether the file was unpacked into the workspace.
    pub extracted: bool,
}

pub struct Installer {
    store: Option<Arc<dyn ContentStore>>,
    max_jitter: Duration,
}

impl Installer {
    pub fn new(store: Option<Arc<dyn ContentStore>>, max_jitter: Duration) -> Self {
        Self { store, max_jitter }
    }

    /// Fetch `uri` and unpack it into `workspace` if it is a tarball.
    pub fn install(&self, uri: &str, workspace: &Workspace) -> RunnerResult<InstallReport> {
        let transport = Transport::parse(uri).ok_or_else(|| {
            RunnerError::install(
                "unsupported install URI",
                serde_json::json!({ "uri": uri }),
            )
        })?;

        let delay = jitter_delay(self.max_jitter);
        debug!(delay = ?delay, "install jitter");
        thread::sleep(delay);

        let local_file = transport
            .fetch(self.store.as_deref(), workspace.path())
            .map_err(|err| install_error(uri, &err))?;
        if !local_file.is_file() {
            return Err(RunnerError::install(
                "installed file is missing",
                serde_json::json!({
                    "uri": uri,
                    "path": local_file.display().to_string(),
                }),
            ));
        }

        let extracted = is_tarball(&local_file);
        if extracted {
            extract_tarball(&local_file, workspace.path()).map_err(|err| {
                RunnerError::install(
                    format!("failed to extract {}", local_file.display()),
                    err.context,
                )
            })?;
        }

        info!(
            uri,
            transport = transport.scheme(),
            file = %local_file.display(),
            extracted,
            "installed package"
        );
        Ok(InstallReport {
            source: uri.to_string(),
            transport: transport.scheme().to_string(),
            local_file,
            extracted,
        })
    }
}

fn install_error(uri: &str, err: &TransportError) -> RunnerError {
    RunnerError::install(
        "failed to fetch install source",
        serde_json::json!({ "uri": uri, "source": err.to_string() }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn tarball_suffixes() {
        assert!(is_tarball(Path::new("/a/pkg.tar.gz")));
        assert!(is_tarball(Path::new("pkg.tgz")));
        assert!(!is_tarball(Path::new("pkg.tar")));
        assert!(!is_tarball(Path::new("pkg.gz")));
        assert!(!is_tarball(Path::new("tar.gz/")));
    }

    #[test]
    fn jitter_stays_below_bound() {
        let max = Duration::from_millis(5);
        for _ in 0..50 {
            assert!(jitter_delay(max) < max);
        }
    }

    #[test]
    fn zero_jitter_is_zero() {
        assert_eq!(jitter_delay(Duration::ZERO), Duration::ZERO);
    }
}

//! URI-addressed file transports shared by the package installer (fetch side)
//! and the result relay (push side).
//!
//! Supported shapes:
//! - `cas://<object>`: object in the configured [`ContentStore`]
//! - `file://<path>`: a local path; callers pass absolute paths, a relative one
//!   resolves against the `base_dir`/`dest_dir` handed to the operation
//! - `host:path` or `user@host:path`: remote file copied with scp

pub mod remote;
pub mod store;

pub use store::{ContentStore, FsContentStore, StoreError};

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONTENT_STORE_SCHEME: &str = "cas://";
pub const LOCAL_SCHEME: &str = "file://";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("content store is not configured (set --content-store-root)")]
    StoreNotConfigured,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("remote copy failed ({target}): {message}")]
    Remote { target: String, message: String },

    #[error("no file name in {0}")]
    NoFileName(String),

    #[error("local file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Transport selected by a URI's shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    ContentStore { object: String },
    Local { path: PathBuf },
    Remote { host: String, path: String },
}

impl Transport {
    /// Classify `uri`, or `None` when no transport handles it.
    #[must_use]
    pub fn parse(uri: &str) -> Option<Self> {
        if let Some(object) = uri.strip_prefix(CONTENT_STORE_SCHEME) {
            return (!object.is_empty()).then(|| Self::ContentStore {
                object: object.to_string(),
            });
        }
        if let Some(path) = uri.strip_prefix(LOCAL_SCHEME) {
            return (!path.is_empty()).then(|| Self::Local {
                path: PathBuf::from(path),
            });
        }
        if uri.contains("://") {
            return None;
        }
        let (host, path) = uri.split_once(':')?;
        let host_ok = !host.is_empty()
            && !host.contains('/')
            && !host.chars().any(char::is_whitespace);
        if !host_ok || path.is_empty() {
            return None;
        }
        Some(Self::Remote {
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    /// Whether this is a `file://` URI with a relative path.
    #[must_use]
    pub fn is_relative_local(&self) -> bool {
        matches!(self, Self::Local { path } if path.is_relative())
    }

    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::ContentStore { .. } => "cas",
            Self::Local { .. } => "file",
            Self::Remote { .. } => "scp",
        }
    }

    /// Final path component of the addressed file.
    #[must_use]
    pub fn file_name(&self) -> Option<OsString> {
        let path = match self {
            Self::ContentStore { object } => Path::new(object),
            Self::Local { path } => path.as_path(),
            Self::Remote { path, .. } => Path::new(path),
        };
        path.file_name().map(ToOwned::to_owned)
    }

    /// Make the addressed file available locally and return its path.
    ///
    /// Content-store and remote files are copied into `dest_dir`; local files
    /// are used in place.
    pub fn fetch(
        &self,
        store: Option<&dyn ContentStore>,
        dest_dir: &Path,
    ) -> Result<PathBuf, TransportError> {
        match self {
            Self::ContentStore { object } => {
                let store = store.ok_or(TransportError::StoreNotConfigured)?;
                let dest = dest_dir.join(self.required_file_name()?);
                store.fetch(object, &dest)?;
                Ok(dest)
            }
            Self::Local { path } => {
                let path = resolve_local(path, dest_dir);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(TransportError::Missing(path))
                }
            }
            Self::Remote { .. } => {
                let dest = dest_dir.join(self.required_file_name()?);
                remote::copy(OsString::from(self.to_string()).as_os_str(), dest.as_os_str())?;
                Ok(dest)
            }
        }
    }

    /// Copy the local file `src` to the addressed destination.
    pub fn push(
        &self,
        store: Option<&dyn ContentStore>,
        src: &Path,
        base_dir: &Path,
    ) -> Result<(), TransportError> {
        match self {
            Self::ContentStore { object } => {
                let store = store.ok_or(TransportError::StoreNotConfigured)?;
                store.put(src, object)?;
                Ok(())
            }
            Self::Local { path } => {
                let path = resolve_local(path, base_dir);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(src, &path)?;
                Ok(())
            }
            Self::Remote { .. } => {
                remote::copy(src.as_os_str(), OsString::from(self.to_string()).as_os_str())
            }
        }
    }

    fn required_file_name(&self) -> Result<OsString, TransportError> {
        self.file_name()
            .ok_or_else(|| TransportError::NoFileName(self.to_string()))
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentStore { object } => write!(f, "{CONTENT_STORE_SCHEME}{object}"),
            Self::Local { path } => write!(f, "{LOCAL_SCHEME}{}", path.display()),
            Self::Remote { host, path } => write!(f, "{host}:{path}"),
        }
    }
}

fn resolve_local(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

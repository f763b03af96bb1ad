use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

const DIGEST_SUFFIX: &str = ".sha256";

/// Errors from content store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object path: {0}")]
    InvalidObjectPath(String),

    #[error("incomplete fetch of {object}: expected {expected} bytes, got {actual}")]
    Incomplete {
        object: String,
        expected: u64,
        actual: u64,
    },

    #[error("digest mismatch for {object}")]
    DigestMismatch { object: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Store of objects addressed by path, shared between many runners.
pub trait ContentStore: Send + Sync {
    /// Copy `object` to `dest`, returning the number of bytes written.
    /// `dest` only appears once the copy is complete and verified.
    fn fetch(&self, object: &str, dest: &Path) -> StoreResult<u64>;

    /// Upload `src` as `object`, replacing any previous version.
    fn put(&self, src: &Path, object: &str) -> StoreResult<u64>;

    /// Check whether `object` exists without reading it.
    fn exists(&self, object: &str) -> StoreResult<bool>;
}

/// Filesystem-backed content store.
///
/// Layout: `<root>/<object path>` plus a `<object path>.sha256` sidecar
/// holding the hex digest recorded at upload time.
#[derive(Clone, Debug)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, object: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(object.trim_start_matches('/'));
        let valid = relative.components().count() > 0
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(StoreError::InvalidObjectPath(object.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn digest_path(object_path: &Path) -> PathBuf {
    let mut name = OsString::from(object_path.as_os_str());
    name.push(DIGEST_SUFFIX);
    PathBuf::from(name)
}

/// Stream `reader` into `writer`, returning the byte count and hex digest.
fn copy_hashed(reader: &mut impl Read, writer: &mut impl Write) -> io::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total: u64 = 0;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = buf.get(..n).unwrap_or_default();
        hasher.update(chunk);
        writer.write_all(chunk)?;
        total += n as u64;
    }
    writer.flush()?;
    Ok((total, hex::encode(hasher.finalize())))
}

impl ContentStore for FsContentStore {
    fn fetch(&self, object: &str, dest: &Path) -> StoreResult<u64> {
        let path = self.object_path(object)?;
        let mut source = File::open(&path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(object.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        let expected = source.metadata()?.len();

        let dest_dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dest_dir)?;
        let (actual, digest) = copy_hashed(&mut source, &mut tmp)?;
        if actual != expected {
            return Err(StoreError::Incomplete {
                object: object.to_string(),
                expected,
                actual,
            });
        }
        match fs::read_to_string(digest_path(&path)) {
            Ok(recorded) if recorded.trim() != digest => {
                return Err(StoreError::DigestMismatch {
                    object: object.to_string(),
                });
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }

        tmp.persist(dest).map_err(|err| StoreError::Io(err.error))?;
        Ok(actual)
    }

    fn put(&self, src: &Path, object: &str) -> StoreResult<u64> {
        let path = self.object_path(object)?;
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::InvalidObjectPath(object.to_string()))?;
        fs::create_dir_all(parent)?;

        let mut source = File::open(src)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        let (written, digest) = copy_hashed(&mut source, &mut tmp)?;
        tmp.persist(&path).map_err(|err| StoreError::Io(err.error))?;
        fs::write(digest_path(&path), format!("{digest}\n"))?;
        Ok(written)
    }

    fn exists(&self, object: &str) -> StoreResult<bool> {
        Ok(self.object_path(object)?.is_file())
    }
}

//! Result relay: copy captures to their configured destinations and render
//! the caller-visible output of a finished chain.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{CaptureRange, ChainResult, SandboxConfig};
use crate::transport::{ContentStore, Transport};

/// Lines of captured stderr shown to the caller when the chain fails.
pub const STDERR_EXCERPT_LINES: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStream {
    Stdout,
    Stderr,
}

impl fmt::Display for CaptureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// Destination of one captured stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTarget {
    pub stream: CaptureStream,
    pub uri: String,
}

impl RelayTarget {
    /// Targets configured for this run, stdout first.
    #[must_use]
    pub fn from_config(config: &SandboxConfig) -> Vec<Self> {
        [
            (CaptureStream::Stdout, &config.stdout_copy_path),
            (CaptureStream::Stderr, &config.stderr_copy_path),
        ]
        .into_iter()
        .filter_map(|(stream, uri)| {
            uri.as_ref().map(|uri| Self {
                stream,
                uri: uri.clone(),
            })
        })
        .collect()
    }
}

/// A relay copy that failed. Never changes the exit code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayWarning {
    pub stream: CaptureStream,
    pub uri: String,
    pub message: String,
}

/// Copy the captured files to every target. Failures are logged and
/// returned as warnings; relaying always continues with the next target.
pub fn relay(
    stdout: &Path,
    stderr: &Path,
    targets: &[RelayTarget],
    store: Option<&dyn ContentStore>,
    base_dir: &Path,
) -> Vec<RelayWarning> {
    let mut warnings = Vec::new();
    for target in targets {
        let source = match target.stream {
            CaptureStream::Stdout => stdout,
            CaptureStream::Stderr => stderr,
        };
        let result = match Transport::parse(&target.uri) {
            Some(transport) => transport
                .push(store, source, base_dir)
                .map_err(|err| err.to_string()),
            None => Err("unsupported relay URI".to_string()),
        };
        match result {
            Ok(()) => debug!(stream = %target.stream, uri = %target.uri, "relayed capture"),
            Err(message) => {
                warn!(stream = %target.stream, uri = %target.uri, error = %message, "relay failed");
                warnings.push(RelayWarning {
                    stream: target.stream,
                    uri: target.uri.clone(),
                    message,
                });
            }
        }
    }
    warnings
}

/// Write what the caller sees on stdout.
///
/// A passing chain prints its captured stdout only when `echo` is set. A
/// failing chain always prints the start of the failing step's stderr.
pub fn render_caller_output(
    result: &ChainResult,
    echo: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    if result.success() {
        if echo {
            out.write_all(&fs::read(&result.stdout_path)?)?;
        }
    } else {
        let range = result.failed_step().map(|step| step.stderr);
        let excerpt = stderr_excerpt(&result.stderr_path, range, STDERR_EXCERPT_LINES)?;
        out.write_all(excerpt.as_bytes())?;
    }
    out.flush()
}

/// First `max_lines` lines of `path`, restricted to `range` when given.
pub fn stderr_excerpt(
    path: &Path,
    range: Option<CaptureRange>,
    max_lines: usize,
) -> io::Result<String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(err),
    };
    let slice = match range {
        Some(range) => {
            let len = bytes.len();
            let start = usize::try_from(range.start).unwrap_or(len).min(len);
            let end = usize::try_from(range.end).unwrap_or(len).clamp(start, len);
            bytes.get(start..end).unwrap_or_default()
        }
        None => bytes.as_slice(),
    };
    let text = String::from_utf8_lossy(slice);
    let mut excerpt = String::new();
    for line in text.lines().take(max_lines) {
        excerpt.push_str(line);
        excerpt.push('\n');
    }
    Ok(excerpt)
}

use std::ffi::OsStr;
use std::process::{Command, Stdio};

use super::TransportError;

/// Secure remote-copy program.
pub const SCP_PROGRAM: &str = "scp";

/// Copy `from` to `to` with scp. Either side may be `host:path`.
///
/// Batch mode keeps scp from prompting; stdin is detached for the same reason.
pub fn copy(from: &OsStr, to: &OsStr) -> Result<(), TransportError> {
    let output = Command::new(SCP_PROGRAM)
        .arg("-q")
        .arg("-B")
        .arg(from)
        .arg(to)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|err| TransportError::Remote {
            target: describe(from, to),
            message: format!("cannot run {SCP_PROGRAM}: {err}"),
        })?;
    if output.status.success() {
        return Ok(());
    }
    Err(TransportError::Remote {
        target: describe(from, to),
        message: format!(
            "{SCP_PROGRAM} exited with {}: {}",
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string()),
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    })
}

fn describe(from: &OsStr, to: &OsStr) -> String {
    format!("{} -> {}", from.to_string_lossy(), to.to_string_lossy())
}

use crate::model::RunId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const RUN_SUMMARY_VERSION: u32 = 1;

/// Milliseconds since the Unix epoch, saturating on clock errors.
#[must_use]
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Errored,
}

/// Byte range of a capture file written by one step.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureRange {
    pub start: u64,
    pub end: u64,
}

impl CaptureRange {
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExitStatus {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Shell-style status: the exit code, or `128 + signal` for a killed process.
    #[must_use]
    pub fn code(&self) -> i32 {
        match (self.exit_code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            success: status.success(),
            exit_code: status.code(),
            signal,
        }
    }
}

/// Outcome of one attempted command of a chain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    /// Zero-based position in the chain.
    pub index: usize,
    pub command: String,
    /// Resolved path of the command's first token.
    pub executable: PathBuf,
    pub niceness: Option<u8>,
    pub exit_status: ExitStatus,
    pub stdout: CaptureRange,
    pub stderr: CaptureRange,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
}

/// Aggregate outcome of a chain.
///
/// `steps` holds exactly the attempted commands: every command up to and
/// including the first failing one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainResult {
    pub status: RunStatus,
    /// Zero when every step passed, otherwise the status of the first failure.
    pub exit_code: i32,
    pub steps: Vec<StepRecord>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
}

impl ChainResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// The step that stopped the chain, if any.
    #[must_use]
    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|step| !step.exit_status.success)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    pub context: Option<serde_json::Value>,
}

/// Postmortem record written to `run.json` inside the workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_summary_version: u32,
    pub run_id: RunId,
    pub status: RunStatus,
    pub tag: String,
    pub workspace: PathBuf,
    pub command: String,
    pub install_package: Option<String>,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub chain: Option<ChainResult>,
    pub error: Option<ErrorInfo>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn status(exit_code: Option<i32>, signal: Option<i32>) -> ExitStatus {
        ExitStatus {
            success: exit_code == Some(0),
            exit_code,
            signal,
        }
    }

    #[test]
    fn signal_maps_to_shell_convention() {
        assert_eq!(status(None, Some(9)).code(), 137);
        assert_eq!(status(Some(3), None).code(), 3);
        assert_eq!(status(None, None).code(), 1);
    }

    #[test]
    fn capture_range_len_saturates() {
        let range = CaptureRange { start: 10, end: 4 };
        assert!(range.is_empty());
        assert_eq!(CaptureRange { start: 2, end: 7 }.len(), 5);
    }

    #[test]
    fn run_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::Errored).unwrap();
        assert_eq!(json, "\"errored\"");
    }
}

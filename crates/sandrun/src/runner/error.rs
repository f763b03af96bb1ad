use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::model::ErrorInfo;

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Stable classification of invocation-level failures.
///
/// A chain command exiting non-zero is not an error; it is recorded in the
/// chain result and its status becomes the process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Bad or missing arguments, empty command chain.
    #[serde(rename = "E_USAGE")]
    Usage,
    /// Disk-fill threshold exceeded before the workspace was created.
    #[serde(rename = "E_PRECONDITION")]
    Precondition,
    /// Workspace could not be created or entered.
    #[serde(rename = "E_WORKSPACE")]
    Workspace,
    /// Unsupported install URI, fetch/copy/extract failure, missing artifact.
    #[serde(rename = "E_INSTALL")]
    Install,
    /// A chain command's executable is not on the search path.
    #[serde(rename = "E_EXECUTABLE_NOT_FOUND")]
    ExecutableNotFound,
    /// Local I/O failure outside the categories above.
    #[serde(rename = "E_IO")]
    Io,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub const ALL: [Self; 7] = [
        Self::Usage,
        Self::Precondition,
        Self::Workspace,
        Self::Install,
        Self::ExecutableNotFound,
        Self::Io,
        Self::Internal,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "E_USAGE",
            Self::Precondition => "E_PRECONDITION",
            Self::Workspace => "E_WORKSPACE",
            Self::Install => "E_INSTALL",
            Self::ExecutableNotFound => "E_EXECUTABLE_NOT_FOUND",
            Self::Io => "E_IO",
            Self::Internal => "E_INTERNAL",
        }
    }

    #[must_use]
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    /// Every invocation-level failure exits with 1.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        1
    }

    #[must_use]
    pub fn help(self) -> &'static str {
        match self {
            Self::Usage => "Options must precede the command string; run with --help for usage",
            Self::Precondition => "Free disk space or raise --fail-if-disk-full-above",
            Self::Workspace => "Check that the temp dir or working dir is writable",
            Self::Install => {
                "Install URIs take the form cas://<object>, file://<path> or host:path"
            }
            Self::ExecutableNotFound => "The first word of each command must be on PATH",
            Self::Io | Self::Internal => "Re-run with --verbose for details",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct RunnerError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl RunnerError {
    pub fn new(code: ErrorCode, message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Usage, message, None)
    }

    pub fn usage_with_context(message: impl Into<String>, context: Value) -> Self {
        Self::new(ErrorCode::Usage, message, context)
    }

    pub fn precondition(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Precondition, message, context)
    }

    pub fn workspace(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::io(ErrorCode::Workspace, message, err)
    }

    pub fn install(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self::new(ErrorCode::Install, message, context)
    }

    pub fn executable_not_found(command: &str, executable: &str) -> Self {
        Self::new(
            ErrorCode::ExecutableNotFound,
            format!("executable '{executable}' not found on PATH"),
            serde_json::json!({"command": command, "executable": executable}),
        )
    }

    pub fn io(code: ErrorCode, message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self::new(
            code,
            message,
            serde_json::json!({ "source": err.to_string() }),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message, None)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }

    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            context: self.context.clone(),
        }
    }
}

impl Diagnostic for RunnerError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code.help()))
    }
}

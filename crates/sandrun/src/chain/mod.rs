//! Command chain executor.
//!
//! A chain is run as a small state machine over its position. Each attempted
//! command yields a [`StepRecord`]; the first non-zero exit stops the chain
//! and its status becomes the chain's exit code.
//!
//! Output capture is chain-aggregate: `stdout.log` and `stderr.log` are
//! truncated once when the chain starts and every step appends to them, so
//! the output of earlier steps survives. Each step records the byte range it
//! wrote.

use std::env;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rand::Rng;
use tracing::debug;

use crate::model::{unix_millis, CaptureRange, ChainResult, ExitStatus, RunStatus, StepRecord};
use crate::runner::{ErrorCode, RunnerError, RunnerResult};
use crate::workspace::Workspace;

pub const CHAIN_DELIMITER: char = ';';
/// Highest niceness picked when random nice is enabled.
pub const MAX_NICENESS: u8 = 15;
pub const SHELL: &str = "/bin/sh";
pub const NICE_PROGRAM: &str = "nice";

/// Ordered, non-empty list of command strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandChain {
    commands: Vec<String>,
}

impl CommandChain {
    /// Split `raw` on `;`. Blank segments are dropped; a chain with no
    /// commands left is a usage error.
    pub fn parse(raw: &str) -> RunnerResult<Self> {
        let commands: Vec<String> = raw
            .split(CHAIN_DELIMITER)
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        if commands.is_empty() {
            return Err(RunnerError::usage_with_context(
                "empty command chain",
                serde_json::json!({ "command": raw }),
            ));
        }
        Ok(Self { commands })
    }

    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChainOptions {
    /// Run each command under a random niceness in `0..=MAX_NICENESS`.
    pub random_nice: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChainState {
    /// The command at this index runs next.
    Pending(usize),
    Completed,
    Failed { step: usize, exit_code: i32 },
}

/// Open handles shared by all steps of one chain.
struct Captures {
    stdout: File,
    stderr: File,
    log: File,
}

impl Captures {
    fn open(workspace: &Workspace) -> RunnerResult<Self> {
        Ok(Self {
            stdout: open_truncated(&workspace.stdout_path())?,
            stderr: open_truncated(&workspace.stderr_path())?,
            log: open_truncated(&workspace.command_log_path())?,
        })
    }
}

fn open_truncated(path: &Path) -> RunnerResult<File> {
    File::create(path)
        .and_then(|_| OpenOptions::new().append(true).open(path))
        .map_err(|err| {
            RunnerError::new(
                ErrorCode::Io,
                "failed to open capture file",
                serde_json::json!({
                    "path": path.display().to_string(),
                    "source": err.to_string(),
                }),
            )
        })
}

/// Run `chain` inside `workspace` with fail-fast semantics.
///
/// A command exiting non-zero is reported through the returned
/// [`ChainResult`]. An unresolvable executable aborts with
/// `E_EXECUTABLE_NOT_FOUND` and is never written to the command log.
pub fn run_chain(
    chain: &CommandChain,
    workspace: &Workspace,
    options: &ChainOptions,
) -> RunnerResult<ChainResult> {
    let mut captures = Captures::open(workspace)?;
    let mut steps = Vec::with_capacity(chain.commands().len());
    let mut state = ChainState::Pending(0);

    let (status, exit_code) = loop {
        match state {
            ChainState::Pending(index) => {
                let Some(command) = chain.commands().get(index) else {
                    state = ChainState::Completed;
                    continue;
                };
                let step = run_step(index, command, workspace, options, &mut captures)?;
                state = if step.exit_status.success {
                    ChainState::Pending(index + 1)
                } else {
                    ChainState::Failed {
                        step: index,
                        exit_code: step.exit_status.code(),
                    }
                };
                steps.push(step);
            }
            ChainState::Completed => break (RunStatus::Passed, 0),
            ChainState::Failed { step, exit_code } => {
                debug!(step, exit_code, "chain stopped at first failure");
                break (RunStatus::Failed, exit_code);
            }
        }
    };

    Ok(ChainResult {
        status,
        exit_code,
        steps,
        stdout_path: workspace.stdout_path(),
        stderr_path: workspace.stderr_path(),
    })
}

fn run_step(
    index: usize,
    command: &str,
    workspace: &Workspace,
    options: &ChainOptions,
    captures: &mut Captures,
) -> RunnerResult<StepRecord> {
    let name = command.split_whitespace().next().unwrap_or_default();
    let executable = resolve_executable(name, workspace.path())
        .ok_or_else(|| RunnerError::executable_not_found(command, name))?;

    writeln!(
        captures.log,
        "{}",
        strip_workspace_prefix(command, workspace.path())
    )
    .map_err(|err| RunnerError::io(ErrorCode::Io, "failed to write command log", err))?;

    let niceness = options.random_nice.then(random_niceness);
    let stdout_start = capture_len(&captures.stdout)?;
    let stderr_start = capture_len(&captures.stderr)?;

    let mut process = shell_command(command, niceness);
    process
        .current_dir(workspace.path())
        .stdin(Stdio::null())
        .stdout(clone_handle(&captures.stdout)?)
        .stderr(clone_handle(&captures.stderr)?);

    debug!(index, command, executable = %executable.display(), ?niceness, "running step");
    let started_at_ms = unix_millis();
    let status = process.status().map_err(|err| {
        RunnerError::new(
            ErrorCode::Io,
            "failed to spawn command",
            serde_json::json!({ "command": command, "source": err.to_string() }),
        )
    })?;
    let ended_at_ms = unix_millis();
    let exit_status = ExitStatus::from(status);
    debug!(index, exit_code = exit_status.code(), "step finished");

    Ok(StepRecord {
        index,
        command: command.to_string(),
        executable,
        niceness,
        exit_status,
        stdout: CaptureRange {
            start: stdout_start,
            end: capture_len(&captures.stdout)?,
        },
        stderr: CaptureRange {
            start: stderr_start,
            end: capture_len(&captures.stderr)?,
        },
        started_at_ms,
        ended_at_ms,
    })
}

/// Resolve the first token of a command against `PATH`; tokens containing a
/// slash resolve relative to `cwd`.
#[must_use]
pub fn resolve_executable(name: &str, cwd: &Path) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    which::which_in(name, env::var_os("PATH"), cwd).ok()
}

/// Command line as written to the log: absolute workspace paths become
/// relative so logs from different runs compare equal.
#[must_use]
pub fn strip_workspace_prefix(command: &str, workspace: &Path) -> String {
    let root = workspace.display().to_string();
    if root.is_empty() || root == "/" {
        return command.to_string();
    }
    command
        .replace(&format!("{root}/"), "")
        .replace(&root, ".")
}

fn random_niceness() -> u8 {
    rand::rng().random_range(0..=MAX_NICENESS)
}

fn shell_command(command: &str, niceness: Option<u8>) -> Command {
    match niceness {
        Some(level) => {
            let mut process = Command::new(NICE_PROGRAM);
            process
                .arg("-n")
                .arg(level.to_string())
                .arg(SHELL)
                .arg("-c")
                .arg(command);
            process
        }
        None => {
            let mut process = Command::new(SHELL);
            process.arg("-c").arg(command);
            process
        }
    }
}

fn capture_len(file: &File) -> RunnerResult<u64> {
    file.metadata()
        .map(|meta| meta.len())
        .map_err(|err| RunnerError::io(ErrorCode::Io, "failed to stat capture file", err))
}

fn clone_handle(file: &File) -> RunnerResult<Stdio> {
    file.try_clone()
        .map(Stdio::from)
        .map_err(|err| RunnerError::io(ErrorCode::Io, "failed to duplicate capture handle", err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::model::{RunId, SandboxConfig};
    use std::fs;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let root = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            temp_dir: root.path().to_path_buf(),
            tag: "chain".to_string(),
            ..SandboxConfig::default()
        };
        let workspace = Workspace::acquire(&config, RunId::new()).unwrap();
        (root, workspace)
    }

    fn run(raw: &str) -> (tempfile::TempDir, Workspace, ChainResult) {
        let (root, workspace) = workspace();
        let chain = CommandChain::parse(raw).unwrap();
        let result = run_chain(&chain, &workspace, &ChainOptions::default()).unwrap();
        (root, workspace, result)
    }

    #[test]
    fn parse_splits_and_trims() {
        let chain = CommandChain::parse(" echo a ;echo b;; ").unwrap();
        assert_eq!(chain.commands(), ["echo a", "echo b"]);
    }

    #[test]
    fn parse_rejects_empty_chain() {
        for raw in ["", "   ", ";", " ; ; "] {
            let err = CommandChain::parse(raw).unwrap_err();
            assert_eq!(err.code, ErrorCode::Usage);
        }
    }

    #[test]
    fn all_steps_pass() {
        let (_root, _ws, result) = run("true; echo ok");
        assert!(result.success());
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(fs::read_to_string(&result.stdout_path).unwrap(), "ok\n");
    }

    #[test]
    fn stops_at_first_failure_and_inherits_its_code() {
        let (_root, ws, result) = run("echo one; sh -c 'exit 3'; echo never");
        assert!(!result.success());
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.failed_step().map(|step| step.index), Some(1));
        let log = fs::read_to_string(ws.command_log_path()).unwrap();
        assert_eq!(log, "echo one\nsh -c 'exit 3'\n");
    }

    #[test]
    fn later_missing_executable_is_not_resolved_after_failure() {
        let (_root, _ws, result) = run("false; nonexistent_binary_xyz");
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.steps.len(), 1);
    }

    #[test]
    fn missing_executable_aborts_without_log_entry() {
        let (_root, ws) = workspace();
        let chain = CommandChain::parse("echo before; nonexistent_binary_xyz --flag").unwrap();
        let err = run_chain(&chain, &ws, &ChainOptions::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ExecutableNotFound);
        let log = fs::read_to_string(ws.command_log_path()).unwrap();
        assert_eq!(log, "echo before\n");
    }

    #[test]
    fn captures_aggregate_with_per_step_ranges() {
        let (_root, _ws, result) = run("echo first; echo second >&2; echo third");
        let stdout = fs::read_to_string(&result.stdout_path).unwrap();
        assert_eq!(stdout, "first\nthird\n");
        let second = result.steps.get(1).unwrap();
        assert!(second.stdout.is_empty());
        assert_eq!(second.stderr, CaptureRange { start: 0, end: 7 });
        let third = result.steps.get(2).unwrap();
        assert_eq!(third.stdout, CaptureRange { start: 6, end: 12 });
    }

    #[test]
    fn stdin_is_empty() {
        let (_root, _ws, result) = run("wc -c");
        let stdout = fs::read_to_string(&result.stdout_path).unwrap();
        assert_eq!(stdout.trim(), "0");
    }

    #[test]
    fn commands_run_inside_the_workspace() {
        let (_root, ws, result) = run("touch marker; pwd");
        assert!(ws.path().join("marker").is_file());
        let stdout = fs::read_to_string(&result.stdout_path).unwrap();
        assert_eq!(Path::new(stdout.trim()), ws.path());
    }

    #[test]
    fn random_nice_records_a_niceness_in_range() {
        let (_root, ws) = workspace();
        let chain = CommandChain::parse("true").unwrap();
        let options = ChainOptions { random_nice: true };
        let result = run_chain(&chain, &ws, &options).unwrap();
        let niceness = result.steps.first().and_then(|step| step.niceness).unwrap();
        assert!(niceness <= MAX_NICENESS);
    }

    #[test]
    fn workspace_prefix_is_stripped_from_log_lines() {
        let ws = Path::new("/tmp/sandrun-x-1");
        assert_eq!(
            strip_workspace_prefix("cat /tmp/sandrun-x-1/data.txt", ws),
            "cat data.txt"
        );
        assert_eq!(strip_workspace_prefix("ls /tmp/sandrun-x-1", ws), "ls .");
        assert_eq!(strip_workspace_prefix("echo hi", ws), "echo hi");
    }
}

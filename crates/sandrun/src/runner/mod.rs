mod error;

pub use error::*;

use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::chain::{run_chain, ChainOptions, CommandChain};
use crate::install::{InstallReport, Installer};
use crate::model::{
    unix_millis, ChainResult, RunId, RunStatus, RunSummary, SandboxConfig, RUN_SUMMARY_VERSION,
};
use crate::relay::{relay, render_caller_output, RelayTarget, RelayWarning};
use crate::transport::{ContentStore, FsContentStore};
use crate::workspace::{ReleaseOutcome, Workspace};

/// Result of a run that got as far as executing its chain.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// Process exit code: zero, or the status of the first failing command.
    pub exit_code: i32,
    pub chain: ChainResult,
    pub install: Option<InstallReport>,
    pub relay_warnings: Vec<RelayWarning>,
    pub release: ReleaseOutcome,
}

struct Execution {
    install: Option<InstallReport>,
    chain: ChainResult,
    relay_warnings: Vec<RelayWarning>,
}

/// Run `raw_command` in a fresh (or caller-supplied) workspace.
///
/// Usage errors are reported before anything touches the disk. Once the
/// workspace exists it is released on every path, and the caller-visible
/// command output is written to `out`.
pub fn run_sandboxed<W: Write>(
    config: &SandboxConfig,
    raw_command: &str,
    out: &mut W,
) -> RunnerResult<RunOutcome> {
    config.validate()?;
    let chain = CommandChain::parse(raw_command)?;
    let run_id = RunId::new();
    let started_at_ms = unix_millis();

    let workspace = Workspace::acquire(config, run_id)?;
    debug!(%run_id, workspace = %workspace.path().display(), commands = chain.commands().len(), "run started");

    let store = config.content_store_root.as_ref().map(|root| {
        let store: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(root));
        store
    });
    let executed = execute(config, &chain, &workspace, store, out);

    let failed = !matches!(&executed, Ok(execution) if execution.chain.success());
    write_summary(
        &workspace,
        RunSummary {
            run_summary_version: RUN_SUMMARY_VERSION,
            run_id,
            status: match &executed {
                Ok(execution) => execution.chain.status.clone(),
                Err(_) => RunStatus::Errored,
            },
            tag: config.tag.clone(),
            workspace: workspace.path().to_path_buf(),
            command: raw_command.to_string(),
            install_package: config.install_package.clone(),
            started_at_ms,
            ended_at_ms: unix_millis(),
            chain: executed.as_ref().ok().map(|execution| execution.chain.clone()),
            error: executed.as_ref().err().map(RunnerError::to_error_info),
        },
    );
    let release = workspace.release(failed, config.release_policy());

    let execution = executed?;
    Ok(RunOutcome {
        run_id,
        exit_code: execution.chain.exit_code,
        chain: execution.chain,
        install: execution.install,
        relay_warnings: execution.relay_warnings,
        release,
    })
}

fn execute<W: Write>(
    config: &SandboxConfig,
    chain: &CommandChain,
    workspace: &Workspace,
    store: Option<Arc<dyn ContentStore>>,
    out: &mut W,
) -> RunnerResult<Execution> {
    let _cwd = workspace.enter()?;

    let install = match &config.install_package {
        Some(uri) => {
            let installer = Installer::new(
                store.clone(),
                Duration::from_millis(config.install_jitter_ms),
            );
            Some(installer.install(uri, workspace)?)
        }
        None => None,
    };

    let options = ChainOptions {
        random_nice: config.random_nice,
    };
    let chain = run_chain(chain, workspace, &options)?;

    let relay_warnings = relay(
        &chain.stdout_path,
        &chain.stderr_path,
        &RelayTarget::from_config(config),
        store.as_deref(),
        workspace.path(),
    );

    if let Err(err) = render_caller_output(&chain, config.echo_stdout, out) {
        warn!(error = %err, "failed to write command output");
    }

    Ok(Execution {
        install,
        chain,
        relay_warnings,
    })
}

fn write_summary(workspace: &Workspace, summary: RunSummary) {
    let path = workspace.summary_path();
    let written = serde_json::to_vec_pretty(&summary)
        .map_err(|err| err.to_string())
        .and_then(|bytes| fs::write(&path, bytes).map_err(|err| err.to_string()));
    if let Err(err) = written {
        warn!(path = %path.display(), error = %err, "failed to write run summary");
    }
}

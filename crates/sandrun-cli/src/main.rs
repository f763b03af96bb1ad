//! sandrun CLI: run a command chain in a disposable workspace.
//!
//! Options must precede the command string. The first token that is not an
//! option starts the command, and everything after it is passed through
//! verbatim, including tokens that look like options.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use clap::{Parser, ValueEnum};
use miette::{IntoDiagnostic, Result};
use sandrun::transport::LOCAL_SCHEME;
use sandrun::{
    run_sandboxed, SandboxConfig, WorkspaceSource, DEFAULT_INSTALL_JITTER_MS, DEFAULT_TAG,
};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(
    name = "sandrun",
    version,
    about = "Run a ;-separated command chain inside a disposable workspace"
)]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorMode,

    /// Log workspace and step lifecycle to stderr (`RUST_LOG` overrides)
    #[arg(short, long)]
    verbose: bool,

    /// Root for generated workspaces and failure archives
    #[arg(long, env = "SANDRUN_TEMP_DIR", value_name = "PATH")]
    temp_dir: Option<PathBuf>,

    /// Run in this directory instead of a generated one; it is never deleted
    #[arg(long, visible_alias = "use-dir", value_name = "PATH")]
    working_dir: Option<PathBuf>,

    /// Identification suffix for workspace and archive names
    #[arg(long, default_value = DEFAULT_TAG, value_name = "NAME")]
    tag: String,

    /// Keep the workspace whatever the outcome
    #[arg(long)]
    debug: bool,

    /// Fetch (and unpack, for .tar.gz/.tgz) this file into the workspace first
    #[arg(long, value_name = "URI")]
    install_package: Option<String>,

    /// Print the captured stdout when the chain succeeds
    #[arg(long)]
    echo_stdout: bool,

    /// Run every command with a random niceness between 0 and 15
    #[arg(long)]
    random_nice: bool,

    /// Refuse to run when the filesystem is more than N percent full
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..=99))]
    fail_if_disk_full_above: Option<u8>,

    /// Archive the workspace when the chain fails
    #[arg(long)]
    tarball_if_fail: bool,

    /// Copy the captured stdout to this URI
    #[arg(long, value_name = "URI")]
    stdout_copy_path: Option<String>,

    /// Copy the captured stderr to this URI
    #[arg(long, value_name = "URI")]
    stderr_copy_path: Option<String>,

    /// Root of the content store behind cas:// URIs
    #[arg(long, env = "SANDRUN_CONTENT_STORE", value_name = "PATH")]
    content_store_root: Option<PathBuf>,

    /// Upper bound of the random sleep before installing, in milliseconds
    #[arg(long, default_value_t = DEFAULT_INSTALL_JITTER_MS, value_name = "MS")]
    install_jitter_ms: u64,

    /// Command chain, commands separated by ';'
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<String>,
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR environment variable
            if std::env::var("NO_COLOR").is_ok() {
                false
            } else {
                // Check if stderr supports color (where we output diagnostics)
                supports_color::on(supports_color::Stream::Stderr).is_some()
            }
        }
    };

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

/// Diagnostics go to stderr; stdout carries only relayed command output.
fn init_tracing(verbose: bool, use_color: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(use_color)
        .with_target(false)
        .try_init()
        .ok();
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and succeed; every usage error exits 1.
            let code = i32::from(err.use_stderr());
            err.print().ok();
            std::process::exit(code);
        }
    };
    let use_color = configure_colors(cli.color);
    init_tracing(cli.verbose, use_color);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            1
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    let config = build_config(cli)?;
    tracing::debug!(?config, "resolved configuration");
    let command = cli.command.join(" ");
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let outcome = run_sandboxed(&config, &command, &mut out)?;
    Ok(outcome.exit_code)
}

fn build_config(cli: &Cli) -> Result<SandboxConfig> {
    let cwd = std::env::current_dir().into_diagnostic()?;
    let defaults = SandboxConfig::default();
    Ok(SandboxConfig {
        temp_dir: cli
            .temp_dir
            .as_deref()
            .map_or(defaults.temp_dir, |path| absolutize(&cwd, path)),
        workspace: match cli.working_dir.as_deref() {
            Some(path) => WorkspaceSource::Explicit {
                path: absolutize(&cwd, path),
            },
            None => WorkspaceSource::Generated,
        },
        tag: cli.tag.clone(),
        debug: cli.debug,
        install_package: cli.install_package.as_deref().map(|uri| absolutize_uri(&cwd, uri)),
        echo_stdout: cli.echo_stdout,
        random_nice: cli.random_nice,
        disk_fill_threshold: cli.fail_if_disk_full_above,
        tarball_if_fail: cli.tarball_if_fail,
        stdout_copy_path: cli.stdout_copy_path.as_deref().map(|uri| absolutize_uri(&cwd, uri)),
        stderr_copy_path: cli.stderr_copy_path.as_deref().map(|uri| absolutize_uri(&cwd, uri)),
        content_store_root: cli
            .content_store_root
            .as_deref()
            .map(|path| absolutize(&cwd, path)),
        install_jitter_ms: cli.install_jitter_ms,
    })
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Rewrite a relative `file://` URI against `cwd`; other URIs pass through.
fn absolutize_uri(cwd: &Path, uri: &str) -> String {
    match uri.strip_prefix(LOCAL_SCHEME) {
        Some(path) if !path.is_empty() && Path::new(path).is_relative() => {
            format!("{LOCAL_SCHEME}{}", cwd.join(path).display())
        }
        _ => uri.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sandrun").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn tokens_after_the_command_start_are_literal() {
        let cli = parse(&["--debug", "echo", "--tag=x", "--", "-v"]);
        assert!(cli.debug);
        assert_eq!(cli.tag, DEFAULT_TAG);
        assert!(!cli.verbose);
        assert_eq!(cli.command, ["echo", "--tag=x", "--", "-v"]);
    }

    #[test]
    fn use_dir_is_an_alias_of_working_dir() {
        let cli = parse(&["--use-dir=/tmp/ws", "true"]);
        assert_eq!(cli.working_dir, Some(PathBuf::from("/tmp/ws")));
    }

    #[test]
    fn threshold_above_99_is_a_parse_error() {
        let err = Cli::try_parse_from(["sandrun", "--fail-if-disk-full-above=100", "true"])
            .unwrap_err();
        assert!(err.use_stderr());
    }

    #[test]
    fn missing_command_is_a_parse_error() {
        assert!(Cli::try_parse_from(["sandrun", "--debug"]).is_err());
    }

    #[test]
    fn relative_paths_are_made_absolute() {
        let cli = parse(&["--temp-dir=scratch", "--working-dir", "ws", "true"]);
        let config = build_config(&cli).unwrap();
        assert!(config.temp_dir.is_absolute());
        assert!(config.temp_dir.ends_with("scratch"));
        match config.workspace {
            WorkspaceSource::Explicit { path } => assert!(path.is_absolute()),
            WorkspaceSource::Generated => panic!("expected explicit workspace"),
        }
    }

    #[test]
    fn relative_file_uris_resolve_against_the_caller() {
        let cwd = Path::new("/home/ci/job");
        assert_eq!(absolutize_uri(cwd, "file://out.txt"), "file:///home/ci/job/out.txt");
        assert_eq!(absolutize_uri(cwd, "file://logs/err.txt"), "file:///home/ci/job/logs/err.txt");
        assert_eq!(absolutize_uri(cwd, "file:///abs/pkg.tgz"), "file:///abs/pkg.tgz");
        assert_eq!(absolutize_uri(cwd, "cas://runs/out.log"), "cas://runs/out.log");
        assert_eq!(absolutize_uri(cwd, "host:rel/pkg.tgz"), "host:rel/pkg.tgz");

        let cli = parse(&["--stdout-copy-path=file://out.txt", "--install-package=file://p.tgz", "true"]);
        let config = build_config(&cli).unwrap();
        assert!(config.validate().is_ok());
        let here = std::env::current_dir().unwrap();
        assert_eq!(
            config.stdout_copy_path.unwrap(),
            format!("file://{}", here.join("out.txt").display())
        );
    }
}

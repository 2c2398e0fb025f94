//! One-shot command runners: dependency installer and command executor.
//!
//! A run spawns a program in a workspace, collects stdout and stderr
//! concurrently and resolves once the program exits.

mod pip;

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::hub::{LogEvent, LogHub};
use crate::process::ExitInfo;

pub use pip::{PipCommand, validate_package_name};

/// Errors raised by one-shot runs.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program exited unsuccessfully; carries its error text.
    #[error("{0}")]
    Failed(String),

    #[error("invalid package name: {0:?}")]
    InvalidPackage(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Program, arguments and environment of a one-shot run.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, envs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.envs.extend(envs);
        self
    }
}

/// Where to forward output chunks while a run is in progress.
#[derive(Clone, Copy)]
pub struct Forward<'a> {
    pub hub: &'a LogHub,
    pub project_id: &'a str,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitInfo,
}

impl CapturedOutput {
    /// Collected stderr, or `fallback` if the program wrote none.
    fn error_text(&self, fallback: impl FnOnce() -> String) -> String {
        if self.stderr.is_empty() {
            fallback()
        } else {
            self.stderr.clone()
        }
    }
}

/// Run a program to completion, collecting both output streams.
pub async fn run_capture(
    spec: &CommandSpec,
    forward: Option<Forward<'_>>,
) -> Result<CapturedOutput, RunError> {
    debug!(program = %spec.program, args = ?spec.args, cwd = %spec.cwd.display(), "running command");

    let mut child = Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::join!(
        collect(stdout, forward, false),
        collect(stderr, forward, true),
        child.wait(),
    );

    Ok(CapturedOutput {
        stdout: stdout?,
        stderr: stderr?,
        exit: ExitInfo::from_status(status?),
    })
}

async fn collect<R>(reader: Option<R>, forward: Option<Forward<'_>>, is_stderr: bool) -> io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(String::new());
    };

    // Whole lines only, so a multi-byte character never straddles two events.
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line).await?;
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&line);
        if let Some(fwd) = forward {
            let chunk = String::from_utf8_lossy(&line);
            let event = if is_stderr {
                LogEvent::stderr(chunk)
            } else {
                LogEvent::log(chunk.into_owned())
            };
            fwd.hub.emit(fwd.project_id, event);
        }
    }
    Ok(String::from_utf8_lossy(&collected).into_owned())
}

/// Run `command` through `sh -c` in `cwd`, creating the directory if needed.
///
/// The result is stdout followed, when stderr is non-empty, by a newline and
/// stderr. A nonzero exit only fails the call when stdout is empty.
pub async fn execute_shell(
    command: &str,
    cwd: &Path,
    envs: Vec<(String, String)>,
) -> Result<String, RunError> {
    tokio::fs::create_dir_all(cwd).await?;

    let spec = CommandSpec::new("sh", cwd).arg("-c").arg(command).envs(envs);
    let output = run_capture(&spec, None).await?;

    if !output.exit.success() && output.stdout.is_empty() {
        let code = output.exit.code_or_default();
        return Err(RunError::Failed(
            output.error_text(|| format!("Command failed with code {}", code)),
        ));
    }

    let mut combined = output.stdout;
    if !output.stderr.is_empty() {
        combined.push('\n');
        combined.push_str(&output.stderr);
    }
    if combined.is_empty() {
        combined.push_str("Command executed successfully");
    }
    Ok(combined)
}

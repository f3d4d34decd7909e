//! Launches a stage chain as cooperating OS processes.
//!
//! Every stage becomes one child process. Adjacent stages are connected by
//! anonymous pipes created with `O_CLOEXEC`, so each child only keeps the
//! two ends handed to it as standard streams and a downstream stage sees EOF
//! as soon as its writers are gone. File redirections take precedence over
//! the pipe on the same side; the displaced pipe end is closed at once.

use crate::command::{ExitCode, NOT_FOUND_STATUS, RedirectKind, Stage};
use crate::job::{BackgroundJobs, Pipeline, exit_code};
use crate::resolver;
use anyhow::Context;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Failure that abandons a whole pipeline instance.
#[derive(Debug)]
pub enum LaunchError {
    Pipe(nix::Error),
    /// A redirection operator without a file name.
    EmptyRedirect(RedirectKind),
    Redirect { path: String, source: io::Error },
    Spawn { name: String, source: io::Error },
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LaunchError::Pipe(e) => write!(f, "cannot create pipe: {}", e),
            LaunchError::EmptyRedirect(kind) => {
                write!(f, "syntax error: missing file name after '{}'", operator(*kind))
            }
            LaunchError::Redirect { path, source } => write!(f, "{}: {}", path, source),
            LaunchError::Spawn { name, source } => write!(f, "{}: {}", name, source),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Pipe(e) => Some(e),
            LaunchError::EmptyRedirect(_) => None,
            LaunchError::Redirect { source, .. } | LaunchError::Spawn { source, .. } => {
                Some(source)
            }
        }
    }
}

fn operator(kind: RedirectKind) -> &'static str {
    match kind {
        RedirectKind::Stdin => "<",
        RedirectKind::Stdout => ">",
        RedirectKind::StdoutAppend => ">>",
    }
}

/// Launch every stage of the chain without waiting for any of them.
///
/// A stage whose executable cannot be resolved is reported and recorded with
/// status 127; the other stages still run. Any other failure kills and reaps
/// the stages launched so far and returns the error.
pub fn launch(chain: &Stage) -> Result<Pipeline, LaunchError> {
    let mut pipeline = Pipeline::new();
    match launch_stages(chain, &mut pipeline) {
        Ok(()) => Ok(pipeline),
        Err(e) => {
            debug!(launched = pipeline.len(), error = %e, "abandoning pipeline");
            pipeline.abandon();
            Err(e)
        }
    }
}

fn launch_stages(chain: &Stage, pipeline: &mut Pipeline) -> Result<(), LaunchError> {
    let mut upstream: Option<OwnedFd> = None;

    for (index, stage) in chain.iter().enumerate() {
        let (downstream, pipe_write) = if stage.next.is_some() {
            let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(LaunchError::Pipe)?;
            (Some(read), Some(write))
        } else {
            (None, None)
        };

        let stdin = match stage.redirects.input() {
            Some(path) => Stdio::from(open_redirect(path, RedirectKind::Stdin)?),
            None => upstream.take().map_or_else(Stdio::inherit, Stdio::from),
        };
        let stdout = match stage.redirects.output() {
            Some((path, kind)) => Stdio::from(open_redirect(path, kind)?),
            None => pipe_write.map_or_else(Stdio::inherit, Stdio::from),
        };
        // Dropped here when a redirection displaced it.
        drop(upstream.take());
        upstream = downstream;

        match resolver::resolve(&stage.executable_name) {
            Some(program) => {
                let mut argv = stage.argv();
                let mut command = Command::new(&program);
                if let Some(name) = argv.next() {
                    command.arg0(name);
                }
                let child = command
                    .args(argv)
                    .stdin(stdin)
                    .stdout(stdout)
                    .spawn()
                    .map_err(|source| LaunchError::Spawn {
                        name: stage.executable_name.clone(),
                        source,
                    })?;
                info!(stage = index, pid = child.id(), program = %program.display(), "launched");
                pipeline.push_child(child);
            }
            None => {
                eprintln!("-shellfyre: {}: command not found", stage.executable_name);
                pipeline.push_finished(NOT_FOUND_STATUS);
            }
        }
    }
    Ok(())
}

fn open_redirect(path: &str, kind: RedirectKind) -> Result<File, LaunchError> {
    if path.is_empty() {
        return Err(LaunchError::EmptyRedirect(kind));
    }
    let file = match kind {
        RedirectKind::Stdin => File::open(path),
        RedirectKind::Stdout => OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path),
        RedirectKind::StdoutAppend => OpenOptions::new().append(true).create(true).open(path),
    };
    file.map_err(|source| LaunchError::Redirect {
        path: path.to_string(),
        source,
    })
}

/// Run a chain, blocking unless its last stage is marked background.
///
/// A foreground chain returns the last stage's status. A background chain
/// is handed to `jobs`, announced as `[pid]`, and reports success at once.
pub fn execute(chain: &Stage, jobs: &mut BackgroundJobs) -> Result<ExitCode, LaunchError> {
    let pipeline = launch(chain)?;
    if !chain.last().background || pipeline.job_id().is_none() {
        let status = pipeline.wait();
        debug!(status, "pipeline finished");
        return Ok(status);
    }
    if let Some(id) = jobs.push(pipeline) {
        println!("[{}]", id);
    }
    Ok(0)
}

/// Run one helper program with inherited streams and wait for it.
pub fn run_program(name: &str, args: &[&str]) -> anyhow::Result<ExitCode> {
    let program =
        resolver::resolve(name).with_context(|| format!("{}: command not found", name))?;
    let status = Command::new(&program)
        .args(args)
        .status()
        .with_context(|| format!("{}: failed to run", name))?;
    Ok(exit_code(status))
}

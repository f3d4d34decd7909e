//! Handles to the processes of a launched pipeline.

use crate::command::ExitCode;
use std::process::{Child, ExitStatus};
use tracing::{info, warn};

/// One stage of a launched pipeline.
#[derive(Debug)]
pub enum StageProcess {
    Running(Child),
    /// Stage that never started or has been reaped, with its status.
    Finished(ExitCode),
}

impl StageProcess {
    fn pid(&self) -> Option<u32> {
        match self {
            StageProcess::Running(child) => Some(child.id()),
            StageProcess::Finished(_) => None,
        }
    }

    /// Collect the exit status if the process is done, without blocking.
    fn poll(&mut self) -> bool {
        let StageProcess::Running(child) = self else {
            return true;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(pid = child.id(), status = %status, "reaped stage");
                *self = StageProcess::Finished(exit_code(status));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(pid = child.id(), error = %e, "failed to poll stage");
                *self = StageProcess::Finished(1);
                true
            }
        }
    }

    /// Block until the process is done and return its status.
    fn join(&mut self) -> ExitCode {
        let code = match self {
            StageProcess::Finished(code) => return *code,
            StageProcess::Running(child) => match child.wait() {
                Ok(status) => exit_code(status),
                Err(e) => {
                    warn!(pid = child.id(), error = %e, "failed to wait for stage");
                    1
                }
            },
        };
        *self = StageProcess::Finished(code);
        code
    }
}

/// The processes of one launched stage chain, first stage first.
#[derive(Debug, Default)]
pub struct Pipeline {
    processes: Vec<StageProcess>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_child(&mut self, child: Child) {
        self.processes.push(StageProcess::Running(child));
    }

    pub fn push_finished(&mut self, code: ExitCode) {
        self.processes.push(StageProcess::Finished(code));
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Process id used to name the job: its last running stage.
    pub fn job_id(&self) -> Option<u32> {
        self.processes.iter().rev().find_map(StageProcess::pid)
    }

    /// Wait for every stage; the status is the last stage's.
    pub fn wait(mut self) -> ExitCode {
        let mut last = 0;
        for process in &mut self.processes {
            last = process.join();
        }
        last
    }

    /// Reap whatever has finished; true once every stage is done.
    pub fn poll(&mut self) -> bool {
        let mut done = true;
        for process in &mut self.processes {
            done &= process.poll();
        }
        done
    }

    /// Kill and reap stages that are still running.
    pub fn abandon(mut self) {
        for process in &mut self.processes {
            if let StageProcess::Running(child) = process {
                if let Err(e) = child.kill() {
                    warn!(pid = child.id(), error = %e, "failed to kill stage");
                }
            }
            process.join();
        }
    }
}

/// Pipelines left running in the background, reaped lazily.
#[derive(Debug, Default)]
pub struct BackgroundJobs {
    jobs: Vec<(u32, Pipeline)>,
}

impl BackgroundJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a background pipeline, returning the id it is reported under.
    pub fn push(&mut self, pipeline: Pipeline) -> Option<u32> {
        let id = pipeline.job_id()?;
        self.jobs.push((id, pipeline));
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Reap finished pipelines without blocking and return their ids.
    pub fn reap(&mut self) -> Vec<u32> {
        let mut finished = Vec::new();
        self.jobs.retain_mut(|(id, pipeline)| {
            if pipeline.poll() {
                finished.push(*id);
                false
            } else {
                true
            }
        });
        finished
    }
}

/// Exit code of a finished process, `128 + signal` when it was killed.
pub fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(x) => x,
        None => terminated_by_signal(status),
    }
}

fn terminated_by_signal(exit_status: ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = exit_status.signal() {
        128 + signal
    } else if exit_status.core_dumped() {
        255
    } else {
        -1
    }
}

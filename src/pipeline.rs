//! Pipeline executor: wires stages together with pipes, hands the processes
//! to the job table and waits for foreground pipelines.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use anyhow::Result;
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::command::{Command, Grouping};
use crate::env::Environment;
use crate::errors::ShellError;
use crate::io_adapters::StageIo;
use crate::jobs::{JobTable, WaitOutcome};

/// Commands joined by `|`, run either in the foreground or with `&`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    commands: Vec<Command>,
    foreground: bool,
}

impl Pipeline {
    pub fn new(commands: Vec<Command>, foreground: bool) -> Self {
        debug_assert!(!commands.is_empty(), "pipeline without commands");
        Self {
            commands,
            foreground,
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, command) in self.commands.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{command}")?;
        }
        if !self.foreground {
            write!(f, " &")?;
        }
        Ok(())
    }
}

/// Run `pipeline`. If it started any process it becomes a job; a pipeline
/// that ran entirely inside the shell is dropped here.
///
/// Only failures to create pipes or processes are returned as errors.
pub fn execute(pipeline: Pipeline, env: &mut Environment, jobs: &mut JobTable) -> Result<()> {
    let pids = match pipeline.commands.as_slice() {
        [] => return Ok(()),
        [single] => single
            .execute(env, jobs, pipeline.foreground, StageIo::default())?
            .into_iter()
            .collect(),
        stages => spawn_stages(stages, env)?,
    };
    let Some(&leader) = pids.first() else {
        return Ok(());
    };

    let foreground = pipeline.foreground;
    let id = jobs.register(pipeline);
    jobs.set_pids(pids);

    if !foreground {
        if env.job_control {
            println!("[{id}] {leader}");
        }
        return Ok(());
    }

    match jobs.wait_foreground(id) {
        Ok(WaitOutcome::Stopped) if env.job_control => println!("\n[{id}] Stopped"),
        Ok(_) => {}
        Err(e) => warn!("{e}"),
    }
    Ok(())
}

/// Fork one process per stage, connected by `stages.len() - 1` pipes.
/// All stages share the first stage's process group.
fn spawn_stages(stages: &[Command], env: &Environment) -> Result<Vec<Pid>> {
    let pipes: Vec<(OwnedFd, OwnedFd)> = (1..stages.len())
        .map(|_| unistd::pipe().map_err(ShellError::resource("pipe")))
        .collect::<Result<_, _>>()?;
    let pipe_fds: Vec<RawFd> = pipes
        .iter()
        .flat_map(|(read, write)| [read.as_raw_fd(), write.as_raw_fd()])
        .collect();

    let mut pids = Vec::with_capacity(stages.len());
    for (i, command) in stages.iter().enumerate() {
        let io = StageIo {
            stdin: i.checked_sub(1).map(|prev| pipes[prev].0.as_raw_fd()),
            stdout: pipes.get(i).map(|(_, write)| write.as_raw_fd()),
            pipe_fds: &pipe_fds,
        };
        let grouping = match pids.first() {
            None => Grouping::lead(env),
            Some(&leader) => Grouping::join(env, leader),
        };
        pids.push(command.spawn(env, io, grouping)?);
    }

    // The parent keeps no pipe ends, so readers see EOF once writers exit.
    drop(pipes);
    debug!(?pids, "pipeline started");
    Ok(pids)
}

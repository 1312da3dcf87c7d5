//! Command executor: launches one program, builtin, block or subshell.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use nix::unistd::{self, ForkResult, Pid};
use tracing::debug;

use crate::builtin::Builtin;
use crate::env::Environment;
use crate::errors::ShellError;
use crate::external;
use crate::interpreter;
use crate::io_adapters::{self, SavedStdio, StageIo};
use crate::jobs::JobTable;
use crate::parser::SequenceNode;
use crate::signals;

/// Conventional process exit code.
pub type ExitCode = i32;

/// How a command's body is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    None,
    Block,
    Subshell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// `argv[0]` is the program or builtin name.
    Program(Vec<String>),
    /// `{ ... }`, run inside the current process.
    Block(SequenceNode),
    /// `( ... )`, run inside a forked child.
    Subshell(SequenceNode),
}

/// A command ready to run. Owned by the pipeline that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub body: Body,
    pub infile: Option<PathBuf>,
    pub outfile: Option<PathBuf>,
}

/// Process group a forked command is placed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Stay in the shell's group (job control off).
    Inherit,
    /// Start a new group led by the child.
    Lead,
    /// Join the group led by an earlier stage.
    Join(Pid),
}

impl Grouping {
    pub fn lead(env: &Environment) -> Self {
        if env.job_control { Grouping::Lead } else { Grouping::Inherit }
    }

    pub fn join(env: &Environment, leader: Pid) -> Self {
        if env.job_control { Grouping::Join(leader) } else { Grouping::Inherit }
    }

    fn pgid_for(self, child: Pid) -> Option<Pid> {
        match self {
            Grouping::Inherit => None,
            Grouping::Lead => Some(child),
            Grouping::Join(leader) => Some(leader),
        }
    }
}

impl Command {
    /// Build a program command from its words (`words[0]` is the program).
    pub fn prepare(words: Vec<String>, infile: Option<PathBuf>, outfile: Option<PathBuf>) -> Self {
        Self {
            body: Body::Program(words),
            infile,
            outfile,
        }
    }

    /// Build a `{ }` or `( )` command around a nested sequence.
    pub fn group(
        mode: Mode,
        block: SequenceNode,
        infile: Option<PathBuf>,
        outfile: Option<PathBuf>,
    ) -> Self {
        let body = match mode {
            Mode::Subshell => Body::Subshell(block),
            Mode::Block | Mode::None => Body::Block(block),
        };
        Self {
            body,
            infile,
            outfile,
        }
    }

    pub fn mode(&self) -> Mode {
        match self.body {
            Body::Program(_) => Mode::None,
            Body::Block(_) => Mode::Block,
            Body::Subshell(_) => Mode::Subshell,
        }
    }

    /// The program name, if this is a program command.
    pub fn file(&self) -> Option<&str> {
        match &self.body {
            Body::Program(argv) => argv.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn argv(&self) -> &[String] {
        match &self.body {
            Body::Program(argv) => argv,
            _ => &[],
        }
    }

    fn builtin(&self) -> Option<Builtin> {
        self.file().and_then(Builtin::lookup)
    }

    /// Run the command as the only stage of a pipeline.
    ///
    /// Blocks and foreground builtins without pipes run inside the shell and
    /// return `None`. Everything else is forked; the child's pid is returned
    /// and waiting for it is up to the caller.
    pub fn execute(
        &self,
        env: &mut Environment,
        jobs: &mut JobTable,
        foreground: bool,
        io: StageIo<'_>,
    ) -> Result<Option<Pid>> {
        if let Body::Block(block) = &self.body {
            let Some(_saved) = self.redirect_shell(io) else {
                return Ok(None);
            };
            interpreter::run(block, env, jobs)?;
            return Ok(None);
        }

        if foreground && io.is_detached() {
            if let Some(builtin) = self.builtin() {
                let Some(_saved) = self.redirect_shell(io) else {
                    return Ok(None);
                };
                let mut stdout = io::stdout();
                builtin.run(&self.argv()[1..], &mut stdout, env, jobs);
                stdout.flush()?;
                return Ok(None);
            }
        }

        self.spawn(env, io, Grouping::lead(env)).map(Some)
    }

    /// Redirect the shell's own stdin/stdout for an in-process command.
    /// Failures are reported and mean the command is skipped.
    fn redirect_shell(&self, io: StageIo<'_>) -> Option<SavedStdio> {
        match SavedStdio::redirect(io, self.infile.as_deref(), self.outfile.as_deref()) {
            Ok(saved) => Some(saved),
            Err(e) => {
                eprintln!("jobsh: {e}");
                None
            }
        }
    }

    /// Fork a process that runs this command with the given pipe ends.
    pub fn spawn(&self, env: &Environment, io: StageIo<'_>, grouping: Grouping) -> Result<Pid> {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        // SAFETY: the shell is single-threaded, and the child only runs the
        // command and then exits.
        match unsafe { unistd::fork() }.map_err(ShellError::resource("fork"))? {
            ForkResult::Parent { child } => {
                if let Some(pgid) = grouping.pgid_for(child) {
                    // Also done by the child; whichever runs first wins.
                    let _ = unistd::setpgid(child, pgid);
                }
                debug!(%child, command = %self, "forked");
                Ok(child)
            }
            ForkResult::Child => {
                let code = self.run_child(env.clone(), io, grouping);
                let _ = io::stdout().flush();
                std::process::exit(code)
            }
        }
    }

    fn run_child(&self, mut env: Environment, io: StageIo<'_>, grouping: Grouping) -> ExitCode {
        signals::restore_defaults();
        if let Some(pgid) = grouping.pgid_for(unistd::getpid()) {
            let _ = unistd::setpgid(Pid::from_raw(0), pgid);
        }

        if let Err(e) = io_adapters::rewire(io, self.infile.as_deref(), self.outfile.as_deref()) {
            eprintln!("jobsh: {e}");
            return 1;
        }

        // Nested pipelines stay in this process group, with their own table.
        env.job_control = false;
        let mut jobs = JobTable::default();

        match &self.body {
            Body::Block(block) | Body::Subshell(block) => {
                match interpreter::run(block, &mut env, &mut jobs) {
                    Ok(()) => 0,
                    Err(e) => {
                        eprintln!("jobsh: {e:#}");
                        1
                    }
                }
            }
            Body::Program(argv) => match self.builtin() {
                Some(builtin) => builtin.run(&argv[1..], &mut io::stdout(), &mut env, &mut jobs),
                None => external::exec(argv),
            },
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Body::Program(argv) => write!(f, "{}", argv.join(" "))?,
            Body::Block(_) => write!(f, "{{ ... }}")?,
            Body::Subshell(_) => write!(f, "( ... )")?,
        }
        if let Some(infile) = &self.infile {
            write!(f, " < {}", display(infile))?;
        }
        if let Some(outfile) = &self.outfile {
            write!(f, " > {}", display(outfile))?;
        }
        Ok(())
    }
}

fn display(path: &Path) -> std::path::Display<'_> {
    path.display()
}

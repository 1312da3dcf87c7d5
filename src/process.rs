//! The seam between job bookkeeping and the operating system.
//!
//! [`JobTable`](crate::jobs::JobTable) never calls `waitpid` or `kill` itself;
//! it asks a [`ProcessControl`]. The shell uses [`OsProcesses`], tests inject
//! scripted events instead of real signals.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{self, Pid};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Non-blocking, exits only (`WNOHANG`).
    Poll,
    /// Blocking until the process exits or stops (`WUNTRACED`).
    Block,
}

/// What a wait on one process reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// Still alive (only reported by [`WaitMode::Poll`]).
    Running,
    Exited(i32),
    Signaled(Signal),
    Stopped(Signal),
    /// Already collected elsewhere, e.g. by the SIGCHLD reaper.
    Reaped,
}

impl WaitEvent {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            WaitEvent::Exited(_) | WaitEvent::Signaled(_) | WaitEvent::Reaped
        )
    }
}

pub trait ProcessControl {
    /// Wait for a state change of `pid`.
    fn wait(&mut self, pid: Pid, mode: WaitMode) -> Result<WaitEvent>;

    /// Send the continue signal to `pid`.
    fn resume(&mut self, pid: Pid) -> Result<()>;

    /// Make `pgid` the terminal's foreground process group.
    fn give_terminal(&mut self, _pgid: Pid) -> Result<()> {
        Ok(())
    }

    /// Give the terminal back to the shell.
    fn reclaim_terminal(&mut self) -> Result<()> {
        Ok(())
    }
}

/// [`ProcessControl`] backed by `waitpid(2)`, `kill(2)` and `tcsetpgrp(3)`.
#[derive(Debug, Default)]
pub struct OsProcesses {
    owns_terminal: bool,
}

impl OsProcesses {
    /// No terminal hand-off; used by non-interactive shells and forked children.
    pub fn detached() -> Self {
        Self {
            owns_terminal: false,
        }
    }

    pub fn with_terminal() -> Self {
        Self {
            owns_terminal: true,
        }
    }
}

impl ProcessControl for OsProcesses {
    fn wait(&mut self, pid: Pid, mode: WaitMode) -> Result<WaitEvent> {
        let flags = match mode {
            WaitMode::Poll => WaitPidFlag::WNOHANG,
            WaitMode::Block => WaitPidFlag::WUNTRACED,
        };
        loop {
            let event = match waitpid(pid, Some(flags)) {
                Ok(WaitStatus::Exited(_, code)) => WaitEvent::Exited(code),
                Ok(WaitStatus::Signaled(_, sig, _)) => WaitEvent::Signaled(sig),
                Ok(WaitStatus::Stopped(_, sig)) => WaitEvent::Stopped(sig),
                Ok(WaitStatus::StillAlive) => WaitEvent::Running,
                Ok(other) => {
                    trace!(?other, "ignoring wait status");
                    if mode == WaitMode::Poll {
                        WaitEvent::Running
                    } else {
                        continue;
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => WaitEvent::Reaped,
                Err(e) => return Err(e).with_context(|| format!("waitpid({pid}) failed")),
            };
            trace!(%pid, ?mode, ?event, "wait");
            return Ok(event);
        }
    }

    fn resume(&mut self, pid: Pid) -> Result<()> {
        match signal::kill(pid, Signal::SIGCONT) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("kill({pid}, SIGCONT) failed")),
        }
    }

    fn give_terminal(&mut self, pgid: Pid) -> Result<()> {
        if self.owns_terminal {
            debug!(%pgid, "handing terminal to job");
            unistd::tcsetpgrp(std::io::stdin(), pgid).context("tcsetpgrp() failed")?;
        }
        Ok(())
    }

    fn reclaim_terminal(&mut self) -> Result<()> {
        if self.owns_terminal {
            unistd::tcsetpgrp(std::io::stdin(), unistd::getpgrp())
                .context("tcsetpgrp() failed")?;
        }
        Ok(())
    }
}

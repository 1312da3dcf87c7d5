//! Signal dispositions of the shell and of its children.

use anyhow::{Context, Result};
use nix::libc::c_int;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

/// Keyboard signals the shell always ignores, so that Ctrl-C and Ctrl-Z only
/// reach the foreground job.
const KEYBOARD: [Signal; 2] = [Signal::SIGINT, Signal::SIGTSTP];

/// Ignored under job control so the shell can take the terminal back with
/// `tcsetpgrp`.
const TERMINAL: [Signal; 2] = [Signal::SIGTTOU, Signal::SIGTTIN];

/// Collect every exited child without blocking. Stops are not reported here
/// (no `WUNTRACED`), so foreground waits still observe them.
extern "C" fn reap_children(_: c_int) {
    while let Ok(status) = waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
        if status == WaitStatus::StillAlive {
            break;
        }
    }
}

/// Install the shell's dispositions.
pub fn install_shell_handlers(job_control: bool) -> Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let terminal: &[Signal] = if job_control { &TERMINAL } else { &[] };
    for &sig in KEYBOARD.iter().chain(terminal) {
        unsafe { sigaction(sig, &ignore) }.with_context(|| format!("sigaction({sig}) failed"))?;
    }

    let reaper = SigAction::new(
        SigHandler::Handler(reap_children),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGCHLD, &reaper) }.context("sigaction(SIGCHLD) failed")?;
    Ok(())
}

/// Called in a freshly forked child before it runs anything, so that the
/// job it belongs to stays controllable from the keyboard. SIGPIPE is reset
/// too: the Rust runtime ignores it and the disposition survives `execv`.
pub fn restore_defaults() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    let inherited = KEYBOARD.iter().chain(&TERMINAL);
    for &sig in inherited.chain(&[Signal::SIGCHLD, Signal::SIGPIPE]) {
        // Cannot fail for these signals.
        let _ = unsafe { sigaction(sig, &default) };
    }
}

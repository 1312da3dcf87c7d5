//! File-descriptor plumbing for redirections and pipes.
//!
//! Forked children rewire fd 0 and 1 permanently with [`rewire`]. Commands
//! that run inside the shell process use [`SavedStdio`], which restores the
//! shell's own stdin/stdout when dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::fcntl::{FcntlArg, fcntl};
use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::unistd;

use crate::errors::ShellError;

/// Pipe ends handed to one pipeline stage. `None` means "keep what the shell has".
#[derive(Debug, Clone, Copy, Default)]
pub struct StageIo<'a> {
    pub stdin: Option<RawFd>,
    pub stdout: Option<RawFd>,
    /// Every pipe fd of the pipeline; the child closes them after rewiring.
    pub pipe_fds: &'a [RawFd],
}

impl StageIo<'_> {
    pub fn is_detached(&self) -> bool {
        self.stdin.is_none() && self.stdout.is_none()
    }
}

/// Open an input redirection target read-only.
pub fn open_input(path: &Path) -> Result<File, ShellError> {
    File::open(path).map_err(|source| ShellError::Redirect {
        path: path.to_path_buf(),
        source,
    })
}

/// Create or truncate an output redirection target with mode 0666 (before umask).
pub fn open_output(path: &Path) -> Result<File, ShellError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o666)
        .open(path)
        .map_err(|source| ShellError::Redirect {
            path: path.to_path_buf(),
            source,
        })
}

fn dup_onto(fd: RawFd, target: RawFd) -> Result<(), ShellError> {
    if fd != target {
        unistd::dup2(fd, target).map_err(|e| ShellError::Io(e.into()))?;
    }
    Ok(())
}

/// Point stdin/stdout at the stage's pipe ends and then at its redirection
/// targets. Redirections win over pipes. All pipe fds are closed afterwards.
pub fn rewire(
    io: StageIo<'_>,
    infile: Option<&Path>,
    outfile: Option<&Path>,
) -> Result<(), ShellError> {
    if let Some(fd) = io.stdin {
        dup_onto(fd, STDIN_FILENO)?;
    }
    if let Some(fd) = io.stdout {
        dup_onto(fd, STDOUT_FILENO)?;
    }
    for &fd in io.pipe_fds {
        let _ = unistd::close(fd);
    }

    if let Some(path) = infile {
        let file = open_input(path)?;
        dup_onto(file.as_raw_fd(), STDIN_FILENO)?;
    }
    if let Some(path) = outfile {
        let file = open_output(path)?;
        dup_onto(file.as_raw_fd(), STDOUT_FILENO)?;
    }
    Ok(())
}

/// Temporarily redirected stdin/stdout of the shell process itself.
pub struct SavedStdio {
    stdin: Option<OwnedFd>,
    stdout: Option<OwnedFd>,
}

impl SavedStdio {
    /// Redirect the shell's own streams; the originals come back on drop.
    pub fn redirect(
        io: StageIo<'_>,
        infile: Option<&Path>,
        outfile: Option<&Path>,
    ) -> Result<Self, ShellError> {
        // Open targets first so a failure leaves the shell untouched.
        let input = infile.map(open_input).transpose()?;
        let output = outfile.map(open_output).transpose()?;

        let stdin_fd = input.as_ref().map(File::as_raw_fd).or(io.stdin);
        let stdout_fd = output.as_ref().map(File::as_raw_fd).or(io.stdout);

        let mut saved = SavedStdio {
            stdin: None,
            stdout: None,
        };
        if let Some(fd) = stdin_fd {
            saved.stdin = Some(save(STDIN_FILENO)?);
            dup_onto(fd, STDIN_FILENO)?;
        }
        if let Some(fd) = stdout_fd {
            let _ = std::io::stdout().flush();
            saved.stdout = Some(save(STDOUT_FILENO)?);
            dup_onto(fd, STDOUT_FILENO)?;
        }
        Ok(saved)
    }
}

/// Close-on-exec copy, so commands forked while the redirection is active
/// do not inherit the shell's original stream.
fn save(fd: RawFd) -> Result<OwnedFd, ShellError> {
    let copy = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(STDERR_FILENO + 1))
        .map_err(|e| ShellError::Io(e.into()))?;
    // SAFETY: `fcntl` returned a fresh descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(copy) })
}

impl Drop for SavedStdio {
    fn drop(&mut self) {
        if let Some(fd) = self.stdout.take() {
            let _ = std::io::stdout().flush();
            let _ = unistd::dup2(fd.as_raw_fd(), STDOUT_FILENO);
        }
        if let Some(fd) = self.stdin.take() {
            let _ = unistd::dup2(fd.as_raw_fd(), STDIN_FILENO);
        }
    }
}

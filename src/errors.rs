//! Error taxonomy of the shell.
//!
//! Only [`ShellError::Resource`] is fatal; everything else is reported and the
//! shell keeps reading lines.

use std::path::PathBuf;

use thiserror::Error;

use crate::jobs::JobId;

#[derive(Error, Debug)]
pub enum ShellError {
    /// Malformed input line. `position` is a byte offset into the line.
    #[error("{message} (pos: {position})")]
    Parse { message: String, position: usize },

    /// The environment cannot provide pipes or processes any more.
    #[error("{call}() failed: {source}")]
    Resource {
        call: &'static str,
        #[source]
        source: nix::Error,
    },

    #[error("{}: {source}", path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program}: command not found")]
    CommandNotFound { program: String },

    #[error("{program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: nix::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShellError {
    pub(crate) fn resource(call: &'static str) -> impl FnOnce(nix::Error) -> ShellError {
        move |source| ShellError::Resource { call, source }
    }

    /// Status a forked child exits with after this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::CommandNotFound { .. } => 127,
            ShellError::Exec { .. } => 126,
            _ => 1,
        }
    }
}

/// Failures of `fg`/`bg` lookups. These never mutate the job table.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {0} has no processes")]
    NoProcesses(JobId),
}

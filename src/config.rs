//! Startup configuration of the shell.
//!
//! Priority for the history file:
//! 1. `--history-file` CLI flag
//! 2. `JOBSH_HISTFILE` environment variable
//! 3. `.history` in the working directory

use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

pub const HISTFILE_ENV: &str = "JOBSH_HISTFILE";
pub const DEFAULT_HISTORY_FILE: &str = ".history";
pub const PROMPT: &str = "$ ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub history_file: PathBuf,
    /// Prompt, line editing, saved history and job control.
    pub interactive: bool,
    pub prompt: String,
}

impl ShellConfig {
    /// Resolve from the CLI flags, the process environment and stdin.
    /// `single_command` (`-c`) always runs non-interactively.
    pub fn resolve(history_flag: Option<PathBuf>, single_command: bool) -> Self {
        let interactive = !single_command && std::io::stdin().is_terminal();
        Self::from_sources(history_flag, std::env::var_os(HISTFILE_ENV), interactive)
    }

    fn from_sources(
        history_flag: Option<PathBuf>,
        history_env: Option<OsString>,
        interactive: bool,
    ) -> Self {
        let history_file = history_flag
            .or_else(|| history_env.filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_FILE));
        Self {
            history_file,
            interactive,
            prompt: if interactive { PROMPT.to_string() } else { String::new() },
        }
    }

    /// Scripted input: no prompt, nothing saved, no job control.
    pub fn non_interactive() -> Self {
        Self::from_sources(None, None, false)
    }
}

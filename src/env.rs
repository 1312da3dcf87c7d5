use anyhow::{Context, Result, anyhow};
use std::env as stdenv;
use std::fs;
use std::path::{Path, PathBuf};

/// Mutable shell state threaded through every command the shell runs.
///
/// The environment contains:
/// - a two-slot directory history (`current` and `previous`), used by `cd -`;
/// - `should_exit`: set by the `exit` builtin, stops the sequence and the loop;
/// - `job_control`: whether forked pipelines get their own process group and the terminal;
/// - the line history shown by the `history` builtin.
///
/// Forked children receive a copy; changes made there never reach the parent.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    current_dir: Option<PathBuf>,
    previous_dir: Option<PathBuf>,
    /// When set to true, the interpreter stops executing and the loop terminates.
    pub should_exit: bool,
    /// Process groups and terminal hand-off are only used when this is set.
    pub job_control: bool,
    history: Vec<String>,
}

impl Environment {
    pub fn new(job_control: bool) -> Self {
        Self {
            job_control,
            ..Self::default()
        }
    }

    /// The cached working directory, computed on first use.
    pub fn current_dir(&mut self) -> Result<&Path> {
        if self.current_dir.is_none() {
            let cwd = stdenv::current_dir().context("getcwd() failed")?;
            self.current_dir = Some(cwd);
        }
        Ok(self.current_dir.as_deref().unwrap_or(Path::new(".")))
    }

    pub fn previous_dir(&self) -> Option<&Path> {
        self.previous_dir.as_deref()
    }

    /// Change to `target` and shift the old directory into the previous slot.
    ///
    /// Relative targets are resolved against the cached directory. On failure
    /// neither slot changes.
    pub fn change_dir(&mut self, target: &Path) -> Result<()> {
        let base = self.current_dir()?.to_path_buf();
        let new_dir = if target.is_absolute() {
            target.to_path_buf()
        } else {
            base.join(target)
        };

        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't canonicalize {}", new_dir.display()))?;
        stdenv::set_current_dir(&canonical)
            .with_context(|| format!("chdir() to {} failed", canonical.display()))?;

        self.previous_dir = Some(base);
        self.current_dir = Some(canonical);
        Ok(())
    }

    /// `cd -`: swap the two slots and change into the new current directory.
    pub fn swap_dirs(&mut self) -> Result<()> {
        let previous = self
            .previous_dir
            .clone()
            .ok_or_else(|| anyhow!("no previous directory"))?;
        let current = self.current_dir()?.to_path_buf();

        stdenv::set_current_dir(&previous)
            .with_context(|| format!("chdir() to {} failed", previous.display()))?;

        self.current_dir = Some(previous);
        self.previous_dir = Some(current);
        Ok(())
    }

    pub fn push_history(&mut self, line: impl Into<String>) {
        self.history.push(line.into());
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }
}

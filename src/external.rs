//! Program lookup and image replacement for commands that are not builtins.

use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd;

use crate::command::ExitCode;
use crate::errors::ShellError;

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Anything containing a `/` (absolute, `./foo`, `bin/sh`) is used as is
///   when it names an executable file.
/// - A single component is searched in each directory of `search_paths`
///   (`PATH`), first match wins.
/// - Empty name: `None`.
pub fn find_command_path<'a>(search_paths: &OsStr, name: &'a Path) -> Option<Cow<'a, Path>> {
    let mut components = name.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(only), None) if !name.as_os_str().as_bytes().contains(&b'/') => {
            find_in_path(search_paths, only.as_os_str()).map(Cow::Owned)
        }
        _ => is_executable(name).then_some(Cow::Borrowed(name)),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Replace the current process image with `argv[0]`, looked up on `PATH`.
/// Only returns on failure.
pub fn replace_image(argv: &[String]) -> ShellError {
    let Some(program) = argv.first() else {
        return ShellError::CommandNotFound {
            program: String::new(),
        };
    };
    let search_paths = std::env::var_os("PATH").unwrap_or_default();
    let Some(path) = find_command_path(&search_paths, Path::new(program)) else {
        return ShellError::CommandNotFound {
            program: program.clone(),
        };
    };

    let exec_failed = |source| ShellError::Exec {
        program: program.clone(),
        source,
    };
    let c_path = match CString::new(path.as_os_str().as_bytes()) {
        Ok(p) => p,
        Err(_) => return exec_failed(nix::Error::EINVAL),
    };
    let c_argv: Result<Vec<CString>, _> = argv.iter().map(|a| CString::new(a.as_bytes())).collect();
    let Ok(c_argv) = c_argv else {
        return exec_failed(nix::Error::EINVAL);
    };

    match unistd::execv(&c_path, &c_argv) {
        Ok(never) => match never {},
        Err(e) => exec_failed(e),
    }
}

/// Exec `argv` in a forked child, reporting failure and returning the exit
/// status the child should end with.
pub fn exec(argv: &[String]) -> ExitCode {
    let err = replace_image(argv);
    eprintln!("jobsh: {err}");
    err.exit_code()
}

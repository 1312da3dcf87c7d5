use crate::command::ExitCode;
use crate::env::Environment;
use crate::jobs::{JobId, JobTable, WaitOutcome};
use anyhow::{Context, Result, anyhow};
use std::io::Write;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins run in the shell process when they are a lone foreground command,
/// so `cd`, `exit`, `fg` and `bg` act on the shell itself. Inside a pipeline or
/// in the background they run in a forked child like any other command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Exit,
    Pwd,
    Cd,
    History,
    Jobs,
    Fg,
    Bg,
}

impl Builtin {
    pub const ALL: [Builtin; 7] = [
        Builtin::Exit,
        Builtin::Pwd,
        Builtin::Cd,
        Builtin::History,
        Builtin::Jobs,
        Builtin::Fg,
        Builtin::Bg,
    ];

    pub fn lookup(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|builtin| builtin.name() == name)
    }

    /// Canonical name of the command, e.g. "pwd" or "cd".
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Exit => "exit",
            Builtin::Pwd => "pwd",
            Builtin::Cd => "cd",
            Builtin::History => "history",
            Builtin::Jobs => "jobs",
            Builtin::Fg => "fg",
            Builtin::Bg => "bg",
        }
    }

    /// Largest number of arguments the command uses.
    fn max_args(self) -> usize {
        match self {
            Builtin::Cd | Builtin::Fg | Builtin::Bg => 1,
            Builtin::Exit | Builtin::Pwd | Builtin::History | Builtin::Jobs => 0,
        }
    }

    /// Run with `args` (not including the command name).
    ///
    /// Extra arguments are reported and ignored. Errors are written to stderr
    /// as `name: message` and turn into exit code 1.
    pub fn run(
        self,
        args: &[String],
        stdout: &mut dyn Write,
        env: &mut Environment,
        jobs: &mut JobTable,
    ) -> ExitCode {
        if args.len() > self.max_args() {
            eprintln!(
                "{}: wrong number of arguments (expected at most {}, got {})",
                self.name(),
                self.max_args(),
                args.len()
            );
        }
        let arg = args.first().map(String::as_str);
        match self.execute(arg, stdout, env, jobs) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{}: {e:#}", self.name());
                1
            }
        }
    }

    fn execute(
        self,
        arg: Option<&str>,
        stdout: &mut dyn Write,
        env: &mut Environment,
        jobs: &mut JobTable,
    ) -> Result<ExitCode> {
        match self {
            Builtin::Exit => {
                env.should_exit = true;
            }
            Builtin::Pwd => {
                writeln!(stdout, "{}", env.current_dir()?.display())?;
            }
            Builtin::Cd => cd(arg, env)?,
            Builtin::History => {
                for (i, line) in env.history().iter().enumerate() {
                    writeln!(stdout, "{:5}: {}", i + 1, line)?;
                }
            }
            Builtin::Jobs => jobs.list(stdout)?,
            Builtin::Fg => {
                let id = target_job(arg, jobs)?;
                if env.job_control {
                    if let Some(job) = jobs.get(id) {
                        writeln!(stdout, "{}", job.pipeline())?;
                    }
                }
                stdout.flush()?;
                if jobs.foreground(id)? == WaitOutcome::Stopped && env.job_control {
                    writeln!(stdout, "\n[{id}] Stopped")?;
                }
            }
            Builtin::Bg => {
                let id = target_job(arg, jobs)?;
                jobs.background(id)?;
                if env.job_control {
                    if let Some(job) = jobs.get(id) {
                        writeln!(stdout, "[{id}] {}", job.pipeline())?;
                    }
                }
            }
        }
        Ok(0)
    }
}

fn cd(arg: Option<&str>, env: &mut Environment) -> Result<()> {
    let target = match arg {
        Some("-") => return env.swap_dirs(),
        Some(t) if !t.is_empty() => PathBuf::from(t),
        _ => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("no target and HOME not set"))?,
    };
    env.change_dir(&target)
}

/// `n` or `%n`; without an argument, the most recently started job.
fn target_job(arg: Option<&str>, jobs: &JobTable) -> Result<JobId> {
    match arg {
        Some(text) => {
            let digits = text.strip_prefix('%').unwrap_or(text);
            let n = digits
                .parse::<u32>()
                .with_context(|| format!("{text}: invalid job id"))?;
            Ok(JobId(n))
        }
        None => jobs.latest_id().ok_or_else(|| anyhow!("no current job")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::tests::lock_current_dir;
    use crate::jobs::JobState;
    use crate::jobs::tests::{Scripted, pipeline};
    use crate::process::WaitEvent;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;
    use std::env;
    use std::fs;

    fn run(
        builtin: Builtin,
        args: &[&str],
        env: &mut Environment,
        jobs: &mut JobTable,
    ) -> (ExitCode, String) {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut out = Vec::new();
        let code = builtin.run(&args, &mut out, env, jobs);
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_lookup_by_name() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::lookup(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::lookup("ls"), None);
        assert_eq!(Builtin::lookup("Exit"), None);
    }

    #[test]
    fn test_pwd_prints_current_dir() {
        let _lock = lock_current_dir();
        let mut shell_env = Environment::new(false);
        let mut jobs = JobTable::default();

        let (code, out) = run(Builtin::Pwd, &[], &mut shell_env, &mut jobs);
        assert_eq!(code, 0);
        assert_eq!(out, format!("{}\n", env::current_dir().unwrap().display()));
    }

    #[test]
    fn test_exit_sets_flag_even_with_extra_args() {
        let mut env = Environment::new(false);
        let mut jobs = JobTable::default();
        let (code, _) = run(Builtin::Exit, &["3"], &mut env, &mut jobs);
        assert_eq!(code, 0);
        assert!(env.should_exit);
    }

    #[test]
    fn test_cd_dash_toggles_two_slots() {
        let _lock = lock_current_dir();
        let orig = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = fs::canonicalize(tmp.path()).unwrap();
        let start = fs::canonicalize(&orig).unwrap();

        let mut shell_env = Environment::new(false);
        let mut jobs = JobTable::default();

        let (code, _) = run(Builtin::Cd, &[target.to_str().unwrap()], &mut shell_env, &mut jobs);
        assert_eq!(code, 0);
        assert_eq!(env::current_dir().unwrap(), target);

        run(Builtin::Cd, &["-"], &mut shell_env, &mut jobs);
        assert_eq!(fs::canonicalize(env::current_dir().unwrap()).unwrap(), start);

        run(Builtin::Cd, &["-"], &mut shell_env, &mut jobs);
        assert_eq!(env::current_dir().unwrap(), target);
        assert_eq!(
            fs::canonicalize(shell_env.previous_dir().unwrap()).unwrap(),
            start
        );

        env::set_current_dir(&orig).unwrap();
    }

    #[test]
    fn test_cd_nonexistent_path_fails_without_moving() {
        let _lock = lock_current_dir();
        let orig = env::current_dir().unwrap();
        let mut shell_env = Environment::new(false);
        let mut jobs = JobTable::default();

        let (code, _) = run(Builtin::Cd, &["/definitely/not/here"], &mut shell_env, &mut jobs);
        assert_eq!(code, 1);
        assert_eq!(env::current_dir().unwrap(), orig);
        assert_eq!(shell_env.previous_dir(), None);
    }

    #[test]
    fn test_history_is_numbered_from_one() {
        let mut env = Environment::new(false);
        let mut jobs = JobTable::default();
        env.push_history("ls");
        env.push_history("history");

        let (_, out) = run(Builtin::History, &[], &mut env, &mut jobs);
        assert_eq!(out, "    1: ls\n    2: history\n");
    }

    #[test]
    fn test_jobs_lists_table() {
        let scripted = Scripted::default();
        let mut jobs = JobTable::new(Box::new(scripted));
        jobs.register(pipeline("sleep"));
        jobs.set_pids(vec![Pid::from_raw(90)]);
        let mut env = Environment::new(false);

        let (_, out) = run(Builtin::Jobs, &[], &mut env, &mut jobs);
        assert_eq!(out, "[1] Running\n");
    }

    #[test]
    fn test_fg_unknown_id_fails() {
        let mut env = Environment::new(false);
        let mut jobs = JobTable::default();
        let (code, out) = run(Builtin::Fg, &["42"], &mut env, &mut jobs);
        assert_eq!(code, 1);
        assert!(out.is_empty());
    }

    #[test]
    fn test_bg_accepts_percent_and_defaults_to_latest() {
        let scripted = Scripted::default();
        let mut jobs = JobTable::new(Box::new(scripted.clone()));
        let mut env = Environment::new(false);

        for pid in [100, 101] {
            jobs.register(pipeline("sleep"));
            jobs.set_pids(vec![Pid::from_raw(pid)]);
            scripted.push(pid, WaitEvent::Stopped(Signal::SIGTSTP));
            jobs.wait_foreground(jobs.latest_id().unwrap()).unwrap();
        }

        assert_eq!(run(Builtin::Bg, &["%1"], &mut env, &mut jobs).0, 0);
        assert_eq!(*scripted.resumed.borrow(), vec![Pid::from_raw(100)]);

        assert_eq!(run(Builtin::Bg, &[], &mut env, &mut jobs).0, 0);
        assert_eq!(
            *scripted.resumed.borrow(),
            vec![Pid::from_raw(100), Pid::from_raw(101)]
        );
        assert_eq!(jobs.get(JobId(2)).unwrap().state(), JobState::Running);
    }

    #[test]
    fn test_invalid_job_id_is_rejected() {
        let jobs = JobTable::default();
        assert!(target_job(Some("abc"), &jobs).is_err());
        assert!(target_job(None, &jobs).is_err());
        assert_eq!(target_job(Some("%7"), &jobs).unwrap(), JobId(7));
    }
}

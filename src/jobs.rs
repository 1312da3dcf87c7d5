//! Job table: every pipeline that needed a process is tracked here until a
//! poll observes that all of its processes are gone.
//!
//! Per-job state machine:
//!
//! ```text
//! Created (no pids) -> Running <-> Stopped -> (all pids exited) -> removed
//! ```
//!
//! Stops are detected by blocking waits (`WUNTRACED`), resumption happens by
//! sending the continue signal, and removal happens in [`JobTable::list`].

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;

use anyhow::Result;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::errors::JobError;
use crate::pipeline::Pipeline;
use crate::process::{OsProcesses, ProcessControl, WaitEvent, WaitMode};

/// Job number shown to the user. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u32);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Registered, processes not attached yet.
    Created,
    Running,
    Stopped,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => write!(f, "Running (no PIDs)"),
            JobState::Running => write!(f, "Running"),
            JobState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of waiting for a job in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Finished,
    Stopped,
}

#[derive(Debug)]
pub struct Job {
    id: JobId,
    pids: Vec<Pid>,
    pipeline: Pipeline,
    stopped: bool,
}

impl Job {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn pids(&self) -> &[Pid] {
        &self.pids
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn state(&self) -> JobState {
        if self.pids.is_empty() {
            JobState::Created
        } else if self.stopped {
            JobState::Stopped
        } else {
            JobState::Running
        }
    }

    /// The first stage leads the process group.
    fn pgid(&self) -> Option<Pid> {
        self.pids.first().copied()
    }
}

pub struct JobTable {
    jobs: VecDeque<Job>,
    next_id: u32,
    processes: Box<dyn ProcessControl>,
}

impl JobTable {
    pub fn new(processes: Box<dyn ProcessControl>) -> Self {
        Self {
            jobs: VecDeque::new(),
            next_id: 1,
            processes,
        }
    }

    /// A table that also moves the terminal between the shell and its jobs.
    pub fn interactive() -> Self {
        Self::new(Box::new(OsProcesses::with_terminal()))
    }

    /// Take ownership of `pipeline` as a new job without processes.
    pub fn register(&mut self, pipeline: Pipeline) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        debug!(%id, %pipeline, "registered job");
        self.jobs.push_back(Job {
            id,
            pids: Vec::new(),
            pipeline,
            stopped: false,
        });
        id
    }

    /// Attach the process ids of the most recently registered job.
    pub fn set_pids(&mut self, pids: Vec<Pid>) {
        if let Some(job) = self.jobs.back_mut() {
            debug!(id = %job.id, ?pids, "job started");
            job.pids = pids;
        }
    }

    pub fn mark_latest_stopped(&mut self) {
        if let Some(job) = self.jobs.back_mut() {
            job.stopped = true;
        }
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn latest_id(&self) -> Option<JobId> {
        self.jobs.back().map(|job| job.id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Print every live job and drop the ones whose processes have all exited.
    pub fn list(&mut self, out: &mut dyn Write) -> Result<()> {
        let mut i = 0;
        while i < self.jobs.len() {
            let job = &self.jobs[i];
            if !job.pids.is_empty() && self.all_exited(i)? {
                if let Some(done) = self.jobs.remove(i) {
                    debug!(id = %done.id, "reaped job");
                }
                continue;
            }
            let job = &self.jobs[i];
            writeln!(out, "[{}] {}", job.id, job.state())?;
            i += 1;
        }
        Ok(())
    }

    fn all_exited(&mut self, index: usize) -> Result<bool> {
        for &pid in &self.jobs[index].pids {
            if !self.processes.wait(pid, WaitMode::Poll)?.is_finished() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn index_of(&self, id: JobId) -> Result<usize, JobError> {
        let index = self
            .jobs
            .iter()
            .position(|job| job.id == id)
            .ok_or(JobError::NotFound(id))?;
        if self.jobs[index].pids.is_empty() {
            return Err(JobError::NoProcesses(id));
        }
        Ok(index)
    }

    /// Send the continue signal to every process of a stopped job.
    fn continue_job(&mut self, index: usize) {
        let job = &mut self.jobs[index];
        if !job.stopped {
            return;
        }
        for &pid in &job.pids {
            if let Err(e) = self.processes.resume(pid) {
                warn!(id = %job.id, %pid, "failed to continue: {e:#}");
            }
        }
        job.stopped = false;
        debug!(id = %job.id, "continued job");
    }

    /// `fg`: continue the job if needed and block until it finishes or stops again.
    /// The terminal is handed over before the continue signal, so the job
    /// can use it as soon as it runs.
    pub fn foreground(&mut self, id: JobId) -> Result<WaitOutcome, JobError> {
        let index = self.index_of(id)?;
        self.give_terminal_to(index);
        self.continue_job(index);
        Ok(self.wait_at(index))
    }

    /// `bg`: continue the job without waiting for it.
    pub fn background(&mut self, id: JobId) -> Result<(), JobError> {
        let index = self.index_of(id)?;
        self.continue_job(index);
        Ok(())
    }

    /// Block on a freshly started foreground job.
    pub fn wait_foreground(&mut self, id: JobId) -> Result<WaitOutcome, JobError> {
        let index = self.index_of(id)?;
        self.give_terminal_to(index);
        Ok(self.wait_at(index))
    }

    fn give_terminal_to(&mut self, index: usize) {
        if let Some(pgid) = self.jobs[index].pgid() {
            if let Err(e) = self.processes.give_terminal(pgid) {
                warn!("{e:#}");
            }
        }
    }

    /// Wait for each process in turn, then take the terminal back.
    ///
    /// The first stop ends the wait and marks the job stopped. Stages still
    /// running could be blocked on a pipe to the stopped one, so they are not
    /// waited for here; [`JobTable::list`] or the next `fg` collects them.
    fn wait_at(&mut self, index: usize) -> WaitOutcome {
        let job = &mut self.jobs[index];
        let processes = &mut self.processes;

        let mut outcome = WaitOutcome::Finished;
        for &pid in &job.pids {
            match processes.wait(pid, WaitMode::Block) {
                Ok(WaitEvent::Stopped(sig)) => {
                    debug!(id = %job.id, %pid, %sig, "job stopped");
                    job.stopped = true;
                    outcome = WaitOutcome::Stopped;
                    break;
                }
                Ok(event) => debug!(id = %job.id, %pid, ?event, "process finished"),
                Err(e) => warn!(id = %job.id, %pid, "{e:#}"),
            }
        }

        if let Err(e) = processes.reclaim_terminal() {
            warn!("{e:#}");
        }
        outcome
    }
}

impl Default for JobTable {
    /// A table without terminal control, as used by forked children.
    fn default() -> Self {
        Self::new(Box::new(OsProcesses::detached()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::command::Command;
    use nix::sys::signal::Signal;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    /// Replays queued wait events per pid and records continue signals.
    /// A pid with an empty queue is still running when polled and exits when
    /// waited on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Call {
        Terminal(Pid),
        Resume(Pid),
        Wait(Pid),
        Reclaim,
    }

    #[derive(Default, Clone)]
    pub(crate) struct Scripted {
        events: Rc<RefCell<HashMap<Pid, VecDeque<WaitEvent>>>>,
        pub resumed: Rc<RefCell<Vec<Pid>>>,
        pub waited: Rc<RefCell<Vec<(Pid, WaitMode)>>>,
        /// Every blocking call, in order.
        pub calls: Rc<RefCell<Vec<Call>>>,
    }

    impl Scripted {
        pub(crate) fn push(&self, pid: i32, event: WaitEvent) {
            self.events
                .borrow_mut()
                .entry(Pid::from_raw(pid))
                .or_default()
                .push_back(event);
        }
    }

    impl ProcessControl for Scripted {
        fn wait(&mut self, pid: Pid, mode: WaitMode) -> Result<WaitEvent> {
            self.waited.borrow_mut().push((pid, mode));
            if mode == WaitMode::Block {
                self.calls.borrow_mut().push(Call::Wait(pid));
            }
            let next = self
                .events
                .borrow_mut()
                .get_mut(&pid)
                .and_then(VecDeque::pop_front);
            Ok(match (next, mode) {
                (Some(event), _) => event,
                (None, WaitMode::Poll) => WaitEvent::Running,
                (None, WaitMode::Block) => WaitEvent::Exited(0),
            })
        }

        fn resume(&mut self, pid: Pid) -> Result<()> {
            self.resumed.borrow_mut().push(pid);
            self.calls.borrow_mut().push(Call::Resume(pid));
            Ok(())
        }

        fn give_terminal(&mut self, pgid: Pid) -> Result<()> {
            self.calls.borrow_mut().push(Call::Terminal(pgid));
            Ok(())
        }

        fn reclaim_terminal(&mut self) -> Result<()> {
            self.calls.borrow_mut().push(Call::Reclaim);
            Ok(())
        }
    }

    pub(crate) fn pipeline(name: &str) -> Pipeline {
        Pipeline::new(vec![Command::prepare(vec![name.to_string()], None, None)], true)
    }

    fn table() -> (JobTable, Scripted) {
        let scripted = Scripted::default();
        (JobTable::new(Box::new(scripted.clone())), scripted)
    }

    fn pids(raw: &[i32]) -> Vec<Pid> {
        raw.iter().copied().map(Pid::from_raw).collect()
    }

    fn listing(jobs: &mut JobTable) -> String {
        let mut out = Vec::new();
        jobs.list(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_ids_increase_and_are_never_reused() {
        let (mut jobs, scripted) = table();
        let first = jobs.register(pipeline("a"));
        jobs.set_pids(pids(&[10]));
        let second = jobs.register(pipeline("b"));
        jobs.set_pids(pids(&[11]));
        assert!(first < second);

        scripted.push(10, WaitEvent::Exited(0));
        scripted.push(11, WaitEvent::Exited(0));
        assert_eq!(listing(&mut jobs), "");
        assert!(jobs.is_empty());

        let third = jobs.register(pipeline("c"));
        assert_eq!(third, JobId(3));
    }

    #[test]
    fn test_list_prints_states_and_reaps_finished_jobs() {
        let (mut jobs, scripted) = table();
        jobs.register(pipeline("sleep"));
        jobs.set_pids(pids(&[20, 21]));
        jobs.register(pipeline("vi"));
        jobs.set_pids(pids(&[22]));
        jobs.mark_latest_stopped();
        jobs.register(pipeline("pending"));

        assert_eq!(
            listing(&mut jobs),
            "[1] Running\n[2] Stopped\n[3] Running (no PIDs)\n"
        );

        // Only one member of job 1 has exited: the job stays.
        scripted.push(20, WaitEvent::Exited(0));
        assert_eq!(
            listing(&mut jobs),
            "[1] Running\n[2] Stopped\n[3] Running (no PIDs)\n"
        );

        scripted.push(21, WaitEvent::Signaled(Signal::SIGTERM));
        scripted.push(20, WaitEvent::Reaped);
        assert_eq!(listing(&mut jobs), "[2] Stopped\n[3] Running (no PIDs)\n");
        assert_eq!(jobs.len(), 2);
    }

    #[test]
    fn test_unknown_id_leaves_table_unchanged() {
        let (mut jobs, scripted) = table();
        jobs.register(pipeline("sleep"));
        jobs.set_pids(pids(&[30]));
        jobs.mark_latest_stopped();

        assert_eq!(jobs.foreground(JobId(9)), Err(JobError::NotFound(JobId(9))));
        assert_eq!(jobs.background(JobId(9)), Err(JobError::NotFound(JobId(9))));

        assert!(scripted.resumed.borrow().is_empty());
        assert!(scripted.waited.borrow().is_empty());
        assert_eq!(jobs.get(JobId(1)).unwrap().state(), JobState::Stopped);
    }

    #[test]
    fn test_job_without_pids_cannot_be_resumed() {
        let (mut jobs, _scripted) = table();
        let id = jobs.register(pipeline("pending"));
        assert_eq!(jobs.background(id), Err(JobError::NoProcesses(id)));
    }

    #[test]
    fn test_wait_stops_early_on_first_stop() {
        let (mut jobs, scripted) = table();
        let id = jobs.register(pipeline("a"));
        jobs.set_pids(pids(&[40, 41, 42]));
        scripted.push(40, WaitEvent::Exited(0));
        scripted.push(41, WaitEvent::Stopped(Signal::SIGTSTP));

        assert_eq!(jobs.wait_foreground(id), Ok(WaitOutcome::Stopped));
        assert_eq!(jobs.get(id).unwrap().state(), JobState::Stopped);

        let waited: Vec<Pid> = scripted.waited.borrow().iter().map(|(p, _)| *p).collect();
        assert_eq!(waited, pids(&[40, 41]));
    }

    #[test]
    fn test_background_continues_every_pid_without_waiting() {
        let (mut jobs, scripted) = table();
        let id = jobs.register(pipeline("a"));
        jobs.set_pids(pids(&[50, 51]));
        scripted.push(50, WaitEvent::Stopped(Signal::SIGTSTP));
        assert_eq!(jobs.wait_foreground(id), Ok(WaitOutcome::Stopped));
        scripted.waited.borrow_mut().clear();

        jobs.background(id).unwrap();

        assert_eq!(*scripted.resumed.borrow(), pids(&[50, 51]));
        assert!(scripted.waited.borrow().is_empty());
        assert_eq!(jobs.get(id).unwrap().state(), JobState::Running);
        assert_eq!(listing(&mut jobs), "[1] Running\n");
    }

    #[test]
    fn test_foreground_resumes_then_restops() {
        let (mut jobs, scripted) = table();
        let id = jobs.register(pipeline("a"));
        jobs.set_pids(pids(&[60]));
        jobs.mark_latest_stopped();

        scripted.push(60, WaitEvent::Stopped(Signal::SIGTSTP));
        assert_eq!(jobs.foreground(id), Ok(WaitOutcome::Stopped));
        assert_eq!(*scripted.resumed.borrow(), pids(&[60]));
        assert_eq!(jobs.get(id).unwrap().state(), JobState::Stopped);

        assert_eq!(jobs.foreground(id), Ok(WaitOutcome::Finished));
        assert_eq!(jobs.get(id).unwrap().state(), JobState::Running);
        assert_eq!(scripted.resumed.borrow().len(), 2);
    }

    #[test]
    fn test_fg_hands_over_terminal_before_continuing() {
        let (mut jobs, scripted) = table();
        let id = jobs.register(pipeline("vi"));
        jobs.set_pids(pids(&[64, 65]));
        jobs.mark_latest_stopped();

        assert_eq!(jobs.foreground(id), Ok(WaitOutcome::Finished));

        let [a, b] = [Pid::from_raw(64), Pid::from_raw(65)];
        assert_eq!(
            *scripted.calls.borrow(),
            vec![
                Call::Terminal(a),
                Call::Resume(a),
                Call::Resume(b),
                Call::Wait(a),
                Call::Wait(b),
                Call::Reclaim,
            ]
        );
    }

    #[test]
    fn test_fg_stops_waiting_at_first_restop() {
        let (mut jobs, scripted) = table();
        let id = jobs.register(pipeline("a"));
        jobs.set_pids(pids(&[66, 67]));
        jobs.mark_latest_stopped();
        scripted.push(66, WaitEvent::Stopped(Signal::SIGTTIN));

        assert_eq!(jobs.foreground(id), Ok(WaitOutcome::Stopped));
        assert_eq!(jobs.get(id).unwrap().state(), JobState::Stopped);
        assert_eq!(scripted.calls.borrow().last(), Some(&Call::Reclaim));
        assert!(!scripted.calls.borrow().contains(&Call::Wait(Pid::from_raw(67))));
    }

    #[test]
    fn test_running_job_is_not_signalled_by_bg() {
        let (mut jobs, scripted) = table();
        let id = jobs.register(pipeline("a"));
        jobs.set_pids(pids(&[70]));
        jobs.background(id).unwrap();
        assert!(scripted.resumed.borrow().is_empty());
    }

    #[test]
    fn test_stop_marks_the_waited_job_not_the_latest() {
        let (mut jobs, scripted) = table();
        let older = jobs.register(pipeline("older"));
        jobs.set_pids(pids(&[80]));
        let newer = jobs.register(pipeline("newer"));
        jobs.set_pids(pids(&[81]));

        scripted.push(80, WaitEvent::Stopped(Signal::SIGSTOP));
        assert_eq!(jobs.foreground(older), Ok(WaitOutcome::Stopped));
        assert_eq!(jobs.get(older).unwrap().state(), JobState::Stopped);
        assert_eq!(jobs.get(newer).unwrap().state(), JobState::Running);
    }
}

use nix::unistd::Pid;
use rsh_types::{ShellError, ShellResult};
use tracing::debug;

use super::signal::{self, MAX_JOBS, StatusBoard};
use super::state::JobState;
use crate::parser::MAX_CMDLINE;

/// One pipeline invocation tracked as a single schedulable unit. The
/// pgid is immutable for the job's lifetime; only the background flag
/// flips, via `fg`/`bg`.
pub struct Job {
    pub id: usize,
    pub pgid: Pid,
    pub background: bool,
    pub cmd: String,
    slot: usize,
    board: &'static StatusBoard,
}

impl Job {
    pub fn state(&self) -> JobState {
        self.board.state(self.slot)
    }

    /// Member pids the kernel has not yet reported as gone.
    pub fn alive_pids(&self) -> Vec<Pid> {
        self.board.alive_pids(self.slot)
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    /// The `jobs` builtin's line format.
    pub fn display_line(&self) -> String {
        format!("[{}] {} {}    {}", self.id, self.pgid, self.state(), self.cmd)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("pgid", &self.pgid)
            .field("background", &self.background)
            .field("cmd", &self.cmd)
            .field("state", &self.state())
            .finish()
    }
}

/// Fixed-capacity registry of live jobs, owned by the control thread.
/// Table slot `i` is paired with status-board slot `i`; the pairing is
/// maintained in lock-step under a `SigchldGuard`.
pub struct JobTable {
    slots: [Option<Job>; MAX_JOBS],
    board: &'static StatusBoard,
}

impl JobTable {
    pub fn new() -> Self {
        Self::with_board(signal::board())
    }

    pub(crate) fn with_board(board: &'static StatusBoard) -> Self {
        JobTable {
            slots: std::array::from_fn(|_| None),
            board,
        }
    }

    /// Ids currently in the table are unique; the next id is one past
    /// the highest live id, so an id is only reused after every holder
    /// of a higher one is gone.
    fn next_id(&self) -> usize {
        let max = self
            .slots
            .iter()
            .flatten()
            .map(|job| job.id)
            .max()
            .unwrap_or(0);
        max + 1
    }

    /// Registers a job at the first free slot. Caller must hold a
    /// `SigchldGuard` so the handler cannot observe a half-registered
    /// job. Returns the assigned job id.
    pub fn register(
        &mut self,
        pgid: Pid,
        pids: &[Pid],
        background: bool,
        cmd: &str,
        state: JobState,
    ) -> ShellResult<usize> {
        let Some(idx) = self.slots.iter().position(Option::is_none) else {
            return Err(ShellError::JobTableFull);
        };
        let id = self.next_id();
        self.board.claim(idx, pgid, pids, state);
        let cmd: String = cmd.chars().take(MAX_CMDLINE).collect();
        debug!("register job [{}] pgid: {} state: {} '{}'", id, pgid, state, cmd);
        self.slots[idx] = Some(Job {
            id,
            pgid,
            background,
            cmd,
            slot: idx,
            board: self.board,
        });
        Ok(id)
    }

    /// Absence is a normal outcome for builtins naming finished jobs.
    pub fn find_by_id(&self, id: usize) -> Option<&Job> {
        self.slots
            .iter()
            .flatten()
            .find(|job| job.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|job| job.id == id)
    }

    #[allow(dead_code)]
    pub fn find_by_pgid(&self, pgid: Pid) -> Option<&Job> {
        self.slots
            .iter()
            .flatten()
            .find(|job| job.pgid == pgid)
    }

    pub fn remove_by_id(&mut self, id: usize) -> Option<Job> {
        let idx = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|job| job.id == id))?;
        let job = self.slots[idx].take();
        self.board.release(idx);
        job
    }

    /// Occupied slots in table order (not sorted by id).
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.slots.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// The periodic sweep: drops every Done job and frees its slots.
    /// Done transitions themselves happen on the notification path;
    /// removal is deferred here to keep the handler minimal.
    pub fn sweep(&mut self) -> Vec<Job> {
        let mut swept = Vec::new();
        for idx in 0..MAX_JOBS {
            let done = self.slots[idx]
                .as_ref()
                .is_some_and(|job| job.state() == JobState::Done);
            if done {
                if let Some(job) = self.slots[idx].take() {
                    debug!("sweeping done job [{}] '{}'", job.id, job.cmd);
                    self.board.release(idx);
                    swept.push(job);
                }
            }
        }
        swept
    }

    /// `bg` default selection: highest-id Stopped job.
    pub fn latest_stopped(&self) -> Option<usize> {
        self.iter()
            .filter(|job| job.state() == JobState::Stopped)
            .map(|job| job.id)
            .max()
    }

    /// `fg` default selection: highest-id non-Done job.
    pub fn latest_active(&self) -> Option<usize> {
        self.iter()
            .filter(|job| job.state() != JobState::Done)
            .map(|job| job.id)
            .max()
    }
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

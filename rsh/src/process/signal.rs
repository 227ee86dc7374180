use anyhow::Result;
use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, Signal, SigmaskHow, killpg, sigaction, sigprocmask,
};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};
use tracing::{debug, error};

use super::state::JobState;
use crate::parser::MAX_STAGES;

/// Job-table capacity. One status slot exists per table slot.
pub const MAX_JOBS: usize = 64;

/// The async-writable projection of one job: everything the SIGCHLD
/// handler is allowed to touch. Fixed size, no allocation, field
/// stores only.
pub(crate) struct StatusSlot {
    /// 0 marks a free slot. Written last on claim so the handler never
    /// sees a half-initialized slot.
    pgid: AtomicI32,
    state: AtomicU8,
    alive: AtomicUsize,
    pids: [AtomicI32; MAX_STAGES],
}

#[allow(clippy::declare_interior_mutable_const)]
const NO_PID: AtomicI32 = AtomicI32::new(0);

impl StatusSlot {
    const fn empty() -> Self {
        StatusSlot {
            pgid: AtomicI32::new(0),
            state: AtomicU8::new(JobState::Running as u8),
            alive: AtomicUsize::new(0),
            pids: [NO_PID; MAX_STAGES],
        }
    }
}

/// Fixed-size board of status slots shared between the control thread
/// and the SIGCHLD handler. The control thread claims and releases
/// slots with SIGCHLD blocked; the handler only performs bounded scans
/// and field writes.
pub(crate) struct StatusBoard {
    slots: [StatusSlot; MAX_JOBS],
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_SLOT: StatusSlot = StatusSlot::empty();

impl StatusBoard {
    pub(crate) const fn new() -> Self {
        StatusBoard {
            slots: [EMPTY_SLOT; MAX_JOBS],
        }
    }

    /// Publishes a job on slot `idx`. Caller must hold a `SigchldGuard`
    /// and own the matching job-table slot.
    pub(crate) fn claim(&self, idx: usize, pgid: Pid, pids: &[Pid], state: JobState) {
        let slot = &self.slots[idx];
        for (i, cell) in slot.pids.iter().enumerate() {
            let raw = pids.get(i).map(|p| p.as_raw()).unwrap_or(0);
            cell.store(raw, Ordering::SeqCst);
        }
        slot.alive.store(pids.len(), Ordering::SeqCst);
        slot.state.store(state as u8, Ordering::SeqCst);
        slot.pgid.store(pgid.as_raw(), Ordering::SeqCst);
    }

    pub(crate) fn release(&self, idx: usize) {
        let slot = &self.slots[idx];
        slot.pgid.store(0, Ordering::SeqCst);
        for cell in slot.pids.iter() {
            cell.store(0, Ordering::SeqCst);
        }
        slot.alive.store(0, Ordering::SeqCst);
        slot.state.store(JobState::Running as u8, Ordering::SeqCst);
    }

    pub(crate) fn state(&self, idx: usize) -> JobState {
        JobState::from_u8(self.slots[idx].state.load(Ordering::SeqCst))
    }

    /// Marks a job Running/Stopped from the control thread (`fg`/`bg`).
    /// `Done` is terminal and always wins over a late mark.
    pub(crate) fn set_state(&self, idx: usize, state: JobState) {
        let cell = &self.slots[idx].state;
        let mut current = cell.load(Ordering::SeqCst);
        while JobState::from_u8(current) != JobState::Done {
            match cell.compare_exchange(
                current,
                state as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(now) => current = now,
            }
        }
    }

    /// Member pids not yet reaped. Control-thread only.
    pub(crate) fn alive_pids(&self, idx: usize) -> Vec<Pid> {
        self.slots[idx]
            .pids
            .iter()
            .map(|cell| cell.load(Ordering::SeqCst))
            .filter(|raw| *raw != 0)
            .map(Pid::from_raw)
            .collect()
    }

    fn find_pid(&self, pid: Pid) -> Option<(&StatusSlot, &AtomicI32)> {
        let raw = pid.as_raw();
        for slot in self.slots.iter() {
            if slot.pgid.load(Ordering::SeqCst) == 0 {
                continue;
            }
            for cell in slot.pids.iter() {
                if cell.load(Ordering::SeqCst) == raw {
                    return Some((slot, cell));
                }
            }
        }
        None
    }

    /// A member exited or was killed. The job turns Done once its last
    /// member is gone. Unknown pids are a benign no-op: the status may
    /// belong to a foreground job that was never registered.
    pub(crate) fn note_exit(&self, pid: Pid) {
        if let Some((slot, cell)) = self.find_pid(pid) {
            cell.store(0, Ordering::SeqCst);
            if slot.alive.fetch_sub(1, Ordering::SeqCst) == 1 {
                slot.state.store(JobState::Done as u8, Ordering::SeqCst);
            }
        }
    }

    pub(crate) fn note_stop(&self, pid: Pid) {
        if let Some((slot, _)) = self.find_pid(pid) {
            let state = JobState::from_u8(slot.state.load(Ordering::SeqCst));
            if state != JobState::Done {
                slot.state.store(JobState::Stopped as u8, Ordering::SeqCst);
            }
        }
    }

    pub(crate) fn note_continue(&self, pid: Pid) {
        if let Some((slot, _)) = self.find_pid(pid) {
            let state = JobState::from_u8(slot.state.load(Ordering::SeqCst));
            if state != JobState::Done {
                slot.state.store(JobState::Running as u8, Ordering::SeqCst);
            }
        }
    }

    /// Applies one kernel-reported status change. Shared by the async
    /// handler and the foreground wait loop.
    pub(crate) fn note_status(&self, status: &WaitStatus) {
        match status {
            WaitStatus::Exited(pid, _) | WaitStatus::Signaled(pid, _, _) => self.note_exit(*pid),
            WaitStatus::Stopped(pid, _) => self.note_stop(*pid),
            WaitStatus::Continued(pid) => self.note_continue(*pid),
            _ => {}
        }
    }
}

static BOARD: StatusBoard = StatusBoard::new();

pub(crate) fn board() -> &'static StatusBoard {
    &BOARD
}

/// Drains every pending child status change without blocking and
/// applies each to the board. Runs inside the SIGCHLD handler and must
/// stay free of allocation and unbounded work.
fn drain_statuses() {
    let options = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(None, Some(options)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => BOARD.note_status(&status),
            Err(_) => break,
        }
    }
}

extern "C" fn handle_sigchld(_: libc::c_int) {
    drain_statuses();
}

/// Installed at startup: the shell ignores the job-control signals its
/// children must still receive, and reaps children asynchronously.
pub fn install() -> Result<()> {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    let reap = SigAction::new(
        SigHandler::Handler(handle_sigchld),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &ignore)?;
        sigaction(Signal::SIGQUIT, &ignore)?;
        sigaction(Signal::SIGTSTP, &ignore)?;
        sigaction(Signal::SIGTTIN, &ignore)?;
        sigaction(Signal::SIGTTOU, &ignore)?;
        sigaction(Signal::SIGCHLD, &reap)?;
    }
    debug!("signal handlers installed");
    Ok(())
}

/// Restores default dispositions in a freshly forked child so the new
/// program reacts normally to ^C/^Z.
/// (refer https://www.gnu.org/software/libc/manual/html_node/Launching-Jobs.html)
pub(crate) fn reset_for_child() -> Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGQUIT, &action)?;
        sigaction(Signal::SIGTSTP, &action)?;
        sigaction(Signal::SIGTTIN, &action)?;
        sigaction(Signal::SIGTTOU, &action)?;
        sigaction(Signal::SIGCHLD, &action)?;
    }
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None)?;
    Ok(())
}

/// Blocks SIGCHLD for the critical section between forking a job and
/// registering it, so a fast-exiting child cannot race registration.
/// Unblocks on drop; pending notifications deliver then.
pub(crate) struct SigchldGuard;

impl SigchldGuard {
    pub(crate) fn block() -> nix::Result<Self> {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), None)?;
        Ok(SigchldGuard)
    }
}

impl Drop for SigchldGuard {
    fn drop(&mut self) {
        let mut set = SigSet::empty();
        set.add(Signal::SIGCHLD);
        if let Err(e) = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None) {
            error!("failed to unblock SIGCHLD: {}", e);
        }
    }
}

pub(crate) fn kill_group(pgid: Pid, signal: Signal) -> nix::Result<()> {
    debug!("sending {:?} to process group {}", signal, pgid);
    killpg(pgid, signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn private_board() -> &'static StatusBoard {
        Box::leak(Box::new(StatusBoard::new()))
    }

    #[test]
    fn exit_of_last_member_marks_done() {
        init();
        let board = private_board();
        let pids = [Pid::from_raw(100), Pid::from_raw(101)];
        board.claim(0, Pid::from_raw(100), &pids, JobState::Running);

        board.note_exit(Pid::from_raw(100));
        assert_eq!(board.state(0), JobState::Running);

        board.note_exit(Pid::from_raw(101));
        assert_eq!(board.state(0), JobState::Done);
        assert!(board.alive_pids(0).is_empty());
    }

    #[test]
    fn stop_and_continue_flip_state() {
        init();
        let board = private_board();
        let pids = [Pid::from_raw(200)];
        board.claim(1, Pid::from_raw(200), &pids, JobState::Running);

        board.note_stop(Pid::from_raw(200));
        assert_eq!(board.state(1), JobState::Stopped);

        board.note_continue(Pid::from_raw(200));
        assert_eq!(board.state(1), JobState::Running);
    }

    #[test]
    fn done_wins_over_late_notifications() {
        init();
        let board = private_board();
        let pids = [Pid::from_raw(300)];
        board.claim(2, Pid::from_raw(300), &pids, JobState::Running);

        board.note_exit(Pid::from_raw(300));
        board.note_continue(Pid::from_raw(300));
        board.note_stop(Pid::from_raw(300));
        assert_eq!(board.state(2), JobState::Done);

        board.set_state(2, JobState::Running);
        assert_eq!(board.state(2), JobState::Done);
    }

    #[test]
    fn unknown_pid_is_a_benign_no_op() {
        init();
        let board = private_board();
        let pids = [Pid::from_raw(400)];
        board.claim(3, Pid::from_raw(400), &pids, JobState::Running);

        board.note_exit(Pid::from_raw(9999));
        board.note_stop(Pid::from_raw(9999));
        assert_eq!(board.state(3), JobState::Running);
        assert_eq!(board.alive_pids(3), vec![Pid::from_raw(400)]);
    }

    #[test]
    fn release_frees_the_slot() {
        init();
        let board = private_board();
        let pids = [Pid::from_raw(500)];
        board.claim(4, Pid::from_raw(500), &pids, JobState::Stopped);
        assert_eq!(board.state(4), JobState::Stopped);

        board.release(4);
        // A released slot no longer matches its old pids.
        board.note_stop(Pid::from_raw(500));
        assert_eq!(board.state(4), JobState::Running);
        assert!(board.alive_pids(4).is_empty());
    }
}

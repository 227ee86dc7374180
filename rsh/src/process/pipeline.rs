use anyhow::{Context as _, Result, bail};
use nix::sys::signal::Signal;
use nix::unistd::{Pid, close, pipe};
use rsh_types::Context;
use std::os::unix::io::RawFd;
use tracing::debug;

use super::fork::{StageIo, fork_stage};
use super::job::JobTable;
use super::signal::{self, SigchldGuard};
use super::state::JobState;
use super::terminal;
use super::wait::{WaitOutcome, wait_for_group};

/// Reported when a foreground pipeline is suspended: 128 + SIGTSTP.
pub const STOPPED_EXIT: i32 = 148;

/// Launches a parsed pipeline as a single job in its own process
/// group, led by the first stage.
///
/// Foreground: hands over the terminal, waits until every stage exits
/// or any stage stops, reclaims the terminal, and either returns the
/// last stage's status or registers the suspended job. Background:
/// registers the job and returns without waiting.
pub fn launch(
    ctx: &Context,
    stages: &[Vec<String>],
    background: bool,
    cmdline: &str,
    jobs: &mut JobTable,
) -> Result<i32> {
    if stages.is_empty() {
        bail!("empty pipeline");
    }
    let foreground = !background;

    // All pipes up front, so one failed allocation tears down cleanly
    // before anything has forked.
    let mut pipes: Vec<(RawFd, RawFd)> = Vec::with_capacity(stages.len().saturating_sub(1));
    for _ in 1..stages.len() {
        match pipe() {
            Ok(fds) => pipes.push(fds),
            Err(err) => {
                close_all(&pipes);
                return Err(err).context("failed to create pipe");
            }
        }
    }
    let all_fds: Vec<RawFd> = pipes.iter().flat_map(|&(r, w)| [r, w]).collect();

    // SIGCHLD stays blocked from the first fork until the job is
    // registered (or fully waited), so a fast-exiting child cannot be
    // reported before the board knows about it.
    let _guard = SigchldGuard::block()?;

    let mut pids: Vec<Pid> = Vec::with_capacity(stages.len());
    let mut pgid: Option<Pid> = None;

    for (i, argv) in stages.iter().enumerate() {
        let io = StageIo {
            stdin: if i == 0 { ctx.infile } else { pipes[i - 1].0 },
            stdout: if i == stages.len() - 1 {
                ctx.outfile
            } else {
                pipes[i].1
            },
        };
        match fork_stage(argv, pgid, io, &all_fds, foreground, ctx.interactive) {
            Ok(pid) => {
                pgid.get_or_insert(pid);
                pids.push(pid);
            }
            Err(err) => {
                // Partial pipeline: close our pipe ends so the already
                // forked stages see EOF, then take the group down.
                close_all(&pipes);
                if let Some(group) = pgid {
                    let _ = signal::kill_group(group, Signal::SIGTERM);
                }
                return Err(err).context("fork failed mid-pipeline");
            }
        }
    }
    close_all(&pipes);

    let Some(group) = pgid else {
        bail!("pipeline launched no stages");
    };
    let Some(&last) = pids.last() else {
        bail!("pipeline launched no stages");
    };
    debug!("launched '{}' pgid: {} stages: {}", cmdline, group, pids.len());

    if background {
        let id = match jobs.register(group, &pids, true, cmdline, JobState::Running) {
            Ok(id) => id,
            Err(err) => {
                // The group is already running with nowhere to track
                // it. Terminate it rather than leak an invisible job.
                let _ = signal::kill_group(group, Signal::SIGTERM);
                return Err(err).context("cannot track background job");
            }
        };
        ctx.write_stdout(&format!("[{id}] {group}"))?;
        return Ok(0);
    }

    if ctx.interactive {
        terminal::give(group)?;
    }
    let outcome = wait_for_group(group, &mut pids, last);
    if ctx.interactive {
        // Reclaim before inspecting the outcome; the shell must never
        // be left in the background of its own terminal.
        terminal::reclaim(ctx.shell_pgid, ctx.shell_tmode.as_ref())?;
    }

    match outcome? {
        WaitOutcome::Finished(code) => Ok(code),
        WaitOutcome::Stopped => {
            let id = match jobs.register(group, &pids, false, cmdline, JobState::Stopped) {
                Ok(id) => id,
                Err(err) => {
                    // An untracked stopped group could never be resumed
                    // or reaped. SIGCONT after SIGTERM so the stopped
                    // processes wake up to die.
                    let _ = signal::kill_group(group, Signal::SIGTERM);
                    let _ = signal::kill_group(group, Signal::SIGCONT);
                    return Err(err).context("cannot track stopped job");
                }
            };
            if let Some(job) = jobs.find_by_id(id) {
                ctx.write_stdout(&job.display_line())?;
            }
            Ok(STOPPED_EXIT)
        }
    }
}

fn close_all(pipes: &[(RawFd, RawFd)]) {
    for &(read_end, write_end) in pipes {
        let _ = close(read_end);
        let _ = close(write_end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::signal::{MAX_JOBS, StatusBoard};
    use nix::unistd::getpid;
    use rsh_types::ShellError;

    fn init() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn test_ctx() -> Context {
        Context::new(getpid(), getpid(), None, false)
    }

    fn table() -> JobTable {
        JobTable::with_board(Box::leak(Box::new(StatusBoard::new())))
    }

    // A single stage that suspends itself, so the foreground wait sees
    // a stop without needing a terminal to deliver ^Z.
    fn stop_self() -> Vec<Vec<String>> {
        vec![vec![
            "sh".to_string(),
            "-c".to_string(),
            "kill -STOP $$".to_string(),
        ]]
    }

    #[test]
    fn stopped_foreground_job_is_registered() {
        init();
        let mut jobs = table();
        let code = launch(&test_ctx(), &stop_self(), false, "stop-self", &mut jobs).unwrap();
        assert_eq!(code, STOPPED_EXIT);

        let id = jobs.latest_stopped().expect("stopped job in the table");
        let job = jobs.find_by_id(id).unwrap();
        assert_eq!(job.state(), JobState::Stopped);
        assert!(!job.background);

        let _ = signal::kill_group(job.pgid, Signal::SIGKILL);
        let _ = signal::kill_group(job.pgid, Signal::SIGCONT);
    }

    #[test]
    fn stopped_job_with_full_table_is_torn_down() {
        init();
        let mut jobs = table();
        for i in 0..MAX_JOBS {
            let fake = Pid::from_raw(100_000 + i as i32);
            jobs.register(fake, &[fake], true, "x", JobState::Running)
                .unwrap();
        }

        let err = launch(&test_ctx(), &stop_self(), false, "stop-self", &mut jobs).unwrap_err();
        assert!(
            err.chain()
                .any(|cause| matches!(cause.downcast_ref::<ShellError>(),
                    Some(ShellError::JobTableFull))),
            "unexpected error: {err:#}"
        );
        // The suspended group was refused, not half-registered.
        assert!(jobs.latest_stopped().is_none());
        assert_eq!(jobs.iter().count(), MAX_JOBS);
    }
}

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::debug;

use super::signal;

/// How a foreground wait ended: the whole pipeline ran to completion
/// (carrying the last stage's status), or some stage stopped and the
/// pipeline is suspended as a unit.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Finished(i32),
    Stopped,
}

/// Blocks until every pid in `pids` has exited or any member of the
/// group stops. Caller holds a `SigchldGuard`, so statuses arrive here
/// rather than in the async handler; each one is still funneled through
/// the shared notification path to keep the status board coherent.
///
/// On return, `pids` holds exactly the members not yet reaped.
pub(crate) fn wait_for_group(pgid: Pid, pids: &mut Vec<Pid>, last: Pid) -> nix::Result<WaitOutcome> {
    let group = Pid::from_raw(-pgid.as_raw());
    let mut exit_code = 0;

    while !pids.is_empty() {
        let status = match waitpid(Some(group), Some(WaitPidFlag::WUNTRACED)) {
            Ok(status) => status,
            Err(Errno::EINTR) => continue,
            // Every member already reaped elsewhere; nothing left to wait on.
            Err(Errno::ECHILD) => break,
            Err(err) => return Err(err.into()),
        };
        debug!("foreground wait: {:?}", status);
        signal::board().note_status(&status);

        match status {
            WaitStatus::Exited(pid, code) => {
                pids.retain(|p| *p != pid);
                if pid == last {
                    exit_code = code;
                }
            }
            WaitStatus::Signaled(pid, sig, _) => {
                pids.retain(|p| *p != pid);
                if pid == last {
                    exit_code = 128 + sig as i32;
                }
            }
            WaitStatus::Stopped(_, _) => return Ok(WaitOutcome::Stopped),
            _ => {}
        }
    }
    Ok(WaitOutcome::Finished(exit_code))
}

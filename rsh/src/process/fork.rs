use anyhow::{Result, bail};
use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{ForkResult, Pid, close, dup2, fork, getpid, setpgid};
use std::os::unix::io::RawFd;
use tracing::debug;

use super::{exec, redirect, signal, terminal};

/// The standard streams one stage inherits: the pipe ends wired up by
/// the pipeline assembler, or the shell's own streams at the edges.
pub(crate) struct StageIo {
    pub stdin: RawFd,
    pub stdout: RawFd,
}

/// Forks one pipeline stage into process group `pgid`, or into a fresh
/// group led by the new child when `pgid` is None (the first stage).
///
/// setpgid runs on both sides of the fork; whichever side wins the
/// race, the child is in its group before either the parent signals
/// the group or the child execs.
pub(crate) fn fork_stage(
    argv: &[String],
    pgid: Option<Pid>,
    io: StageIo,
    pipe_fds: &[RawFd],
    foreground: bool,
    interactive: bool,
) -> Result<Pid> {
    match unsafe { fork() }? {
        ForkResult::Parent { child } => {
            let group = pgid.unwrap_or(child);
            // EACCES here means the child already exec'd after placing
            // itself; any outcome leaves the child in `group`.
            let _ = setpgid(child, group);
            debug!("forked stage pid: {} pgid: {}", child, group);
            Ok(child)
        }
        ForkResult::Child => match child_setup(argv, pgid, io, pipe_fds, foreground, interactive) {
            Ok(cleaned) => exec::exec(&cleaned),
            Err(err) => {
                eprintln!("rsh: {err:#}");
                std::process::exit(1);
            }
        },
    }
}

/// Child-side preparation between fork and exec. Any error ends the
/// child; nothing here may return into the shell's control flow.
fn child_setup(
    argv: &[String],
    pgid: Option<Pid>,
    io: StageIo,
    pipe_fds: &[RawFd],
    foreground: bool,
    interactive: bool,
) -> Result<Vec<String>> {
    let pid = getpid();
    let group = pgid.unwrap_or(pid);
    setpgid(pid, group)?;

    // Grab the terminal while SIGTTOU is still ignored (inherited from
    // the shell); the default disposition comes back just below.
    if foreground && interactive {
        terminal::give(group)?;
    }
    signal::reset_for_child()?;

    if io.stdin != STDIN_FILENO {
        dup2(io.stdin, STDIN_FILENO)?;
    }
    if io.stdout != STDOUT_FILENO {
        dup2(io.stdout, STDOUT_FILENO)?;
    }
    // Every pipe end was duplicated where needed; the originals must
    // all close or upstream readers never see EOF.
    for &fd in pipe_fds {
        let _ = close(fd);
    }

    let cleaned = redirect::splice(argv)?;
    if cleaned.is_empty() {
        bail!("no command left after redirections");
    }
    Ok(cleaned)
}

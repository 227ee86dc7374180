use libc::STDIN_FILENO;
use nix::errno::Errno;
use nix::sys::termios::{SetArg, Termios, tcgetattr, tcsetattr};
use nix::unistd::{Pid, tcsetpgrp};
use tracing::debug;

/// Hands the controlling terminal to `pgid`. SIGCHLD delivery can
/// interrupt the ioctl, so EINTR is retried rather than surfaced.
pub fn give(pgid: Pid) -> nix::Result<()> {
    loop {
        match tcsetpgrp(STDIN_FILENO, pgid) {
            Ok(()) => {
                debug!("terminal handed to pgid {}", pgid);
                return Ok(());
            }
            Err(Errno::EINTR) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Takes the terminal back for the shell and restores its saved modes,
/// undoing whatever the foreground job left behind.
pub fn reclaim(shell_pgid: Pid, tmode: Option<&Termios>) -> nix::Result<()> {
    give(shell_pgid)?;
    if let Some(tmode) = tmode {
        tcsetattr(STDIN_FILENO, SetArg::TCSADRAIN, tmode)?;
    }
    Ok(())
}

/// Snapshot of the shell's terminal modes taken at startup. None when
/// stdin is not a terminal.
pub fn save_modes() -> Option<Termios> {
    tcgetattr(STDIN_FILENO).ok()
}

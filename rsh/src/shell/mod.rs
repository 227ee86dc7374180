use anyhow::Result;
use nix::sys::signal::Signal;
use rsh_types::{Context, ShellError, ShellResult};
use tracing::debug;

use crate::parser;
use crate::process::job::JobTable;
use crate::process::pipeline;
use crate::process::signal::{self, SigchldGuard};
use crate::process::state::JobState;
use crate::process::terminal;
use crate::process::wait::{WaitOutcome, wait_for_group};
use rsh_builtin::ShellProxy;

/// The control thread's state: the job table and the status of the
/// last evaluated line. All job-control builtins funnel through here
/// via `ShellProxy::dispatch`.
pub struct Shell {
    jobs: JobTable,
    pub last_status: i32,
}

impl Shell {
    pub fn new() -> Self {
        Shell {
            jobs: JobTable::new(),
            last_status: 0,
        }
    }

    /// Evaluates one input line: builtins run in-process, everything
    /// else goes through the pipeline engine. Returns the line's exit
    /// status.
    pub fn eval(&mut self, ctx: &Context, line: &str) -> Result<i32> {
        let Some(parsed) = parser::parse_line(line)? else {
            return Ok(self.last_status);
        };
        debug!("eval: {:?}", parsed);

        // Any single-stage line checks the builtin registry first; a
        // trailing `&` on a builtin is ignored rather than sending the
        // name to PATH search. Inside a pipeline builtins never apply.
        let builtin = if parsed.stages.len() == 1 {
            rsh_builtin::get_command(&parsed.stages[0][0])
        } else {
            None
        };
        let code = match builtin {
            Some(cmd) => cmd(ctx, &parsed.stages[0], self).code(),
            None => pipeline::launch(
                ctx,
                &parsed.stages,
                parsed.background,
                &parsed.display,
                &mut self.jobs,
            )?,
        };
        self.last_status = code;
        Ok(code)
    }

    /// Sweeps finished jobs out of the table and announces each one.
    /// Called between input lines so notifications never interleave
    /// with a foreground command's output.
    pub fn report_finished(&mut self, ctx: &Context) -> ShellResult<()> {
        for job in self.jobs.sweep() {
            ctx.write_stdout(&format!(
                "[{}] {} Done    {}",
                job.id, job.pgid, job.cmd
            ))?;
        }
        Ok(())
    }

    /// End-of-input teardown: every remaining job group gets SIGTERM
    /// then SIGKILL, stopped ones included.
    pub fn shutdown(&mut self) {
        for job in self.jobs.iter() {
            debug!("terminating job [{}] pgid: {} '{}'", job.id, job.pgid, job.cmd);
            let _ = signal::kill_group(job.pgid, Signal::SIGTERM);
            let _ = signal::kill_group(job.pgid, Signal::SIGKILL);
        }
    }

    fn run_jobs(&mut self, ctx: &Context) -> ShellResult<()> {
        for job in self.jobs.iter() {
            ctx.write_stdout(&job.display_line())?;
        }
        // Done jobs were just shown; drop them now rather than waiting
        // for the next prompt sweep.
        self.jobs.sweep();
        Ok(())
    }

    /// Brings a job to the foreground, continuing it first if stopped,
    /// and waits for it like a freshly launched pipeline.
    fn run_fg(&mut self, ctx: &Context, argv: &[String]) -> ShellResult<()> {
        let id = match argv.get(1) {
            Some(raw) => parse_job_id(raw)?,
            None => self.jobs.latest_active().ok_or(ShellError::NoSuchJob)?,
        };

        let _guard = SigchldGuard::block()?;
        let (pgid, slot, line, mut remaining) = {
            let job = self.jobs.find_by_id_mut(id).ok_or(ShellError::NoSuchJob)?;
            if job.state() == JobState::Done {
                return Err(ShellError::NoSuchJob);
            }
            job.background = false;
            (job.pgid, job.slot(), job.cmd.clone(), job.alive_pids())
        };
        ctx.write_stdout(&line)?;

        if ctx.interactive {
            terminal::give(pgid)?;
        }
        if signal::board().state(slot) == JobState::Stopped {
            signal::board().set_state(slot, JobState::Running);
            signal::kill_group(pgid, Signal::SIGCONT)?;
        }

        let last = remaining.last().copied().unwrap_or(pgid);
        let outcome = wait_for_group(pgid, &mut remaining, last);
        if ctx.interactive {
            terminal::reclaim(ctx.shell_pgid, ctx.shell_tmode.as_ref())?;
        }

        match outcome? {
            WaitOutcome::Finished(_) => {
                self.jobs.remove_by_id(id);
            }
            WaitOutcome::Stopped => {
                if let Some(job) = self.jobs.find_by_id(id) {
                    ctx.write_stdout(&job.display_line())?;
                }
            }
        }
        Ok(())
    }

    /// Resumes a stopped job in the background. Running jobs are
    /// rejected rather than silently accepted.
    fn run_bg(&mut self, ctx: &Context, argv: &[String]) -> ShellResult<()> {
        let id = match argv.get(1) {
            Some(raw) => parse_job_id(raw)?,
            None => self.jobs.latest_stopped().ok_or(ShellError::NoSuchJob)?,
        };

        let _guard = SigchldGuard::block()?;
        let (pgid, slot) = {
            let job = self.jobs.find_by_id_mut(id).ok_or(ShellError::NoSuchJob)?;
            if job.state() != JobState::Stopped {
                return Err(ShellError::JobNotStopped);
            }
            job.background = true;
            (job.pgid, job.slot())
        };
        signal::board().set_state(slot, JobState::Running);
        signal::kill_group(pgid, Signal::SIGCONT)?;

        if let Some(job) = self.jobs.find_by_id(id) {
            ctx.write_stdout(&format!("[{}] {} {} &", job.id, job.pgid, job.cmd))?;
        }
        Ok(())
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellProxy for Shell {
    fn exit_shell(&mut self) -> ! {
        debug!("exit requested");
        std::process::exit(0);
    }

    fn dispatch(&mut self, ctx: &Context, cmd: &str, argv: &[String]) -> ShellResult<()> {
        match cmd {
            "jobs" => self.run_jobs(ctx),
            "fg" => self.run_fg(ctx, argv),
            "bg" => self.run_bg(ctx, argv),
            _ => Ok(()),
        }
    }

    fn changepwd(&mut self, path: &str) -> ShellResult<()> {
        std::env::set_current_dir(path)?;
        Ok(())
    }
}

/// Job ids are plain numbers; a leading `%` is tolerated for muscle
/// memory from other shells.
fn parse_job_id(raw: &str) -> ShellResult<usize> {
    let digits = raw.strip_prefix('%').unwrap_or(raw);
    digits
        .parse()
        .map_err(|_| ShellError::Parse(format!("invalid job id '{raw}'")))
}

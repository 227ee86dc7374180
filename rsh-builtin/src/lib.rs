use once_cell::sync::Lazy;
use rsh_types::{Context, ExitStatus, ShellResult};
use std::collections::HashMap;
use tracing::debug;

mod bg;
mod cd;
mod fg;
mod jobs;

/// Interface builtin commands use to reach shell state without being
/// coupled to the shell implementation.
pub trait ShellProxy {
    /// Terminates the shell process immediately. Does not return.
    fn exit_shell(&mut self) -> !;

    /// Hands a job-control builtin to the shell, which owns the job
    /// table and the terminal.
    fn dispatch(&mut self, ctx: &Context, cmd: &str, argv: &[String]) -> ShellResult<()>;

    /// Changes the shell's working directory.
    fn changepwd(&mut self, path: &str) -> ShellResult<()>;
}

/// All builtin commands conform to this signature.
pub type BuiltinCommand =
    fn(ctx: &Context, argv: &[String], proxy: &mut dyn ShellProxy) -> ExitStatus;

/// Registry of builtin commands, consulted before any fork happens.
static BUILTIN_COMMAND: Lazy<HashMap<&str, BuiltinCommand>> = Lazy::new(|| {
    let mut builtin = HashMap::new();

    builtin.insert("exit", exit as BuiltinCommand);
    builtin.insert("cd", cd::command as BuiltinCommand);

    // Job control
    builtin.insert("jobs", jobs::command as BuiltinCommand);
    builtin.insert("fg", fg::command as BuiltinCommand);
    builtin.insert("bg", bg::command as BuiltinCommand);

    builtin
});

/// Looks up a builtin by command name.
pub fn get_command(name: &str) -> Option<BuiltinCommand> {
    BUILTIN_COMMAND.get(name).copied()
}

/// `exit` terminates the shell right away, bypassing any pending job
/// cleanup. The end-of-input path is the one that drains jobs.
pub fn exit(_ctx: &Context, _argv: &[String], proxy: &mut dyn ShellProxy) -> ExitStatus {
    debug!("exit builtin called");
    proxy.exit_shell()
}

use super::ShellProxy;
use rsh_types::{Context, ExitStatus};

/// `cd [dir]` changes the working directory, falling back to `$HOME`
/// when no argument is given. On failure the directory is unchanged.
pub fn command(ctx: &Context, argv: &[String], proxy: &mut dyn ShellProxy) -> ExitStatus {
    let dir = match argv.get(1) {
        Some(dir) => dir.to_string(),
        None => match std::env::var("HOME") {
            Ok(home) if !home.is_empty() => home,
            _ => {
                ctx.write_stderr("cd: HOME not set").ok();
                return ExitStatus::ExitedWith(1);
            }
        },
    };

    match proxy.changepwd(&dir) {
        Ok(_) => ExitStatus::ExitedWith(0),
        Err(err) => {
            ctx.write_stderr(&format!("cd: {dir}: {err}")).ok();
            ExitStatus::ExitedWith(1)
        }
    }
}

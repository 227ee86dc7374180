use anyhow::Result;
use clap::Parser;
use nix::unistd::{getpid, isatty, setpgid};
use rsh_types::Context;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod parser;
mod process;
mod repl;
mod shell;

#[derive(Parser, Debug)]
#[command(name = "rsh", version, about = "A small POSIX job-control shell")]
struct Cli {
    /// Evaluate a single command line and exit
    #[arg(short, long)]
    command: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("rsh: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let interactive = cli.command.is_none() && isatty(libc::STDIN_FILENO).unwrap_or(false);

    // Dispositions first: tcsetpgrp from a background group would stop
    // us with SIGTTOU if it were not already ignored.
    process::signal::install()?;

    let shell_pgid = getpid();
    let tmode = if interactive {
        // Fails when the shell is already a session leader; the group
        // exists either way.
        let _ = setpgid(shell_pgid, shell_pgid);
        process::terminal::give(shell_pgid)?;
        process::terminal::save_modes()
    } else {
        None
    };
    debug!(
        "starting pid: {} interactive: {} command: {:?}",
        shell_pgid, interactive, cli.command
    );

    let ctx = Context::new(shell_pgid, shell_pgid, tmode, interactive);
    let mut shell = shell::Shell::new();

    if let Some(line) = cli.command {
        let code = shell.eval(&ctx, &line)?;
        shell.shutdown();
        return Ok(code);
    }
    repl::run(&mut shell, &ctx)
}

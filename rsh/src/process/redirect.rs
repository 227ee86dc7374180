use anyhow::{Context as _, Result, bail};
use libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::dup2;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};

/// A recognized redirection: the operator plus the filename token that
/// followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Input(String),
    Output(String),
    Append(String),
}

impl Redirect {
    fn open(&self) -> Result<File> {
        match self {
            Redirect::Input(path) => {
                File::open(path).with_context(|| format!("cannot open input file '{path}'"))
            }
            Redirect::Output(path) => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o644)
                .open(path)
                .with_context(|| format!("cannot create output file '{path}'")),
            Redirect::Append(path) => OpenOptions::new()
                .append(true)
                .create(true)
                .mode(0o644)
                .open(path)
                .with_context(|| format!("cannot append to file '{path}'")),
        }
    }

    fn target_fd(&self) -> RawFd {
        match self {
            Redirect::Input(_) => STDIN_FILENO,
            Redirect::Output(_) | Redirect::Append(_) => STDOUT_FILENO,
        }
    }
}

/// Extracts `<`, `>` and `>>` operators from an argument vector. Each
/// operator consumes exactly the following token as its filename; both
/// are removed so the launcher never sees them.
pub fn scan(argv: &[String]) -> Result<(Vec<String>, Vec<Redirect>)> {
    let mut cleaned = Vec::with_capacity(argv.len());
    let mut redirects = Vec::new();
    let mut i = 0;
    while i < argv.len() {
        let op = match argv[i].as_str() {
            "<" => Some(Redirect::Input as fn(String) -> Redirect),
            ">" => Some(Redirect::Output as fn(String) -> Redirect),
            ">>" => Some(Redirect::Append as fn(String) -> Redirect),
            _ => None,
        };
        match op {
            Some(make) => {
                let Some(path) = argv.get(i + 1) else {
                    bail!("expected filename after '{}'", argv[i]);
                };
                redirects.push(make(path.clone()));
                i += 2;
            }
            None => {
                cleaned.push(argv[i].clone());
                i += 1;
            }
        }
    }
    Ok((cleaned, redirects))
}

/// Opens every redirection target and splices it onto the matching
/// standard stream. Runs only inside a freshly forked child; the
/// caller turns an error into an immediate child exit, so a failed
/// open never reaches the parent shell's control flow.
pub fn splice(argv: &[String]) -> Result<Vec<String>> {
    let (cleaned, redirects) = scan(argv)?;
    for redirect in &redirects {
        let file = redirect.open()?;
        dup2(file.as_raw_fd(), redirect.target_fd())
            .with_context(|| format!("dup2 failed for {redirect:?}"))?;
        // Dropping `file` closes the original descriptor.
    }
    Ok(cleaned)
}

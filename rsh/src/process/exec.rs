use nix::unistd::execv;
use std::ffi::CString;
use std::path::PathBuf;
use tracing::debug;

/// Reserved status distinguishing launcher failure from the launched
/// program's own exit status.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Candidate paths for a bare command name, in `PATH` order. Empty
/// prefixes are skipped; an empty `PATH` yields no candidates.
pub fn search_candidates(name: &str, path_env: &str) -> Vec<PathBuf> {
    path_env
        .split(':')
        .filter(|prefix| !prefix.is_empty())
        .map(|prefix| PathBuf::from(prefix).join(name))
        .collect()
}

fn to_cstring(s: &str) -> Option<CString> {
    CString::new(s).ok()
}

/// Replaces the current process image. Only ever called in a forked
/// child, after redirection splicing; on success it does not return,
/// and on total failure the child exits with the reserved not-found
/// status so pipeline assembly logic never sees control again.
pub fn exec(argv: &[String]) -> ! {
    let name = &argv[0];
    let c_argv: Option<Vec<CString>> = argv.iter().map(|a| to_cstring(a)).collect();

    if let Some(c_argv) = c_argv {
        if name.contains('/') {
            if let Some(path) = to_cstring(name) {
                debug!("execv literal path {:?}", path);
                let _ = execv(&path, &c_argv);
            }
        } else {
            let path_env = std::env::var("PATH").unwrap_or_default();
            for candidate in search_candidates(name, &path_env) {
                if let Some(path) = to_cstring(&candidate.to_string_lossy()) {
                    // First successful execv never returns; a failed
                    // candidate falls through to the next prefix.
                    let _ = execv(&path, &c_argv);
                }
            }
        }
    }

    eprintln!("rsh: command not found: {name}");
    std::process::exit(EXIT_NOT_FOUND);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_follow_path_order() {
        let candidates = search_candidates("ls", "/usr/local/bin:/usr/bin:/bin");
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("/usr/local/bin/ls"),
                PathBuf::from("/usr/bin/ls"),
                PathBuf::from("/bin/ls"),
            ]
        );
    }

    #[test]
    fn empty_prefixes_are_skipped() {
        let candidates = search_candidates("ls", "::/bin:");
        assert_eq!(candidates, vec![PathBuf::from("/bin/ls")]);
    }

    #[test]
    fn empty_path_yields_no_candidates() {
        assert!(search_candidates("ls", "").is_empty());
    }
}

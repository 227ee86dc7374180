use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Instant;

fn rsh() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rsh"))
}

fn run_script(script: &str) -> std::process::Output {
    let mut child = rsh()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn rsh");
    child
        .stdin
        .as_mut()
        .expect("piped stdin")
        .write_all(script.as_bytes())
        .expect("write script");
    child.wait_with_output().expect("wait for rsh")
}

#[test]
fn command_exit_status_is_propagated() {
    let status = rsh().args(["-c", "true"]).status().unwrap();
    assert_eq!(status.code(), Some(0));

    let status = rsh().args(["-c", "false"]).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn missing_command_exits_127() {
    let out = rsh()
        .args(["-c", "definitely-not-a-command-zzz"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(127));
    assert!(String::from_utf8_lossy(&out.stderr).contains("command not found"));
}

#[test]
fn pipeline_connects_stages() {
    let out = rsh().args(["-c", "echo hello | tr a-z A-Z"]).output().unwrap();
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "HELLO\n");
}

#[test]
fn pipeline_status_comes_from_last_stage() {
    let status = rsh().args(["-c", "false | true"]).status().unwrap();
    assert_eq!(status.code(), Some(0));

    let status = rsh().args(["-c", "true | false"]).status().unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn output_redirection_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.txt");
    std::fs::write(&path, "stale contents\n").unwrap();

    let cmd = format!("echo fresh > {}", path.display());
    let status = rsh().args(["-c", &cmd]).status().unwrap();
    assert_eq!(status.code(), Some(0));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
}

#[test]
fn append_redirection_accumulates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.txt");

    for word in ["one", "two"] {
        let cmd = format!("echo {word} >> {}", path.display());
        assert!(rsh().args(["-c", &cmd]).status().unwrap().success());
    }
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
}

#[test]
fn input_redirection_feeds_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.txt");
    let output = dir.path().join("out.txt");
    std::fs::write(&input, "banana\napple\n").unwrap();

    let cmd = format!("sort < {} > {}", input.display(), output.display());
    let status = rsh().args(["-c", &cmd]).status().unwrap();
    assert_eq!(status.code(), Some(0));
    assert_eq!(std::fs::read_to_string(&output).unwrap(), "apple\nbanana\n");
}

#[test]
fn redirection_to_unwritable_path_fails_the_stage() {
    let out = rsh()
        .args(["-c", "echo hi > /no/such/dir/out.txt"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&out.stderr).is_empty());
}

#[test]
fn script_lines_run_in_order() {
    let out = run_script("echo one\necho two\n");
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "one\ntwo\n");
}

#[test]
fn exit_builtin_stops_the_script() {
    let out = run_script("echo before\nexit\necho after\n");
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "before\n");
}

#[test]
fn cd_builtin_changes_directory_for_children() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    let out = run_script(&format!("cd {}\npwd\n", dir.path().display()));
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim_end(),
        canonical.to_string_lossy()
    );
}

#[test]
fn cd_to_missing_directory_reports_error() {
    let out = run_script("cd /no/such/dir\n");
    assert!(String::from_utf8_lossy(&out.stderr).contains("cd: /no/such/dir"));
}

#[test]
fn background_job_shows_up_in_jobs() {
    let out = run_script("sleep 30 &\njobs\n");
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Running"), "jobs output: {stdout}");
    assert!(stdout.contains("sleep 30"), "jobs output: {stdout}");
}

#[test]
fn background_job_does_not_block_the_shell() {
    let start = Instant::now();
    let out = run_script("sleep 30 &\necho done\n");
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("done"));
    // End of input terminates the leftover job instead of waiting it out.
    assert!(start.elapsed().as_secs() < 10);
}

#[test]
fn finished_background_job_is_announced() {
    let out = run_script("true &\nsleep 0.3\njobs\n");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Done"), "expected Done notice, got: {stdout}");
}

#[test]
fn parse_errors_do_not_kill_the_shell() {
    let out = run_script("ls | | wc\necho still-here\n");
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("still-here"));
    assert!(String::from_utf8_lossy(&out.stderr).contains("empty command"));
}

#[test]
fn builtin_wins_over_background_marker() {
    let out = run_script("sleep 30 &\njobs &\n");
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Running"), "jobs output: {stdout}");
    assert!(stdout.contains("sleep 30"), "jobs output: {stdout}");
    assert!(
        !String::from_utf8_lossy(&out.stderr).contains("command not found"),
        "builtin went to PATH search"
    );
}

#[test]
fn fg_with_no_jobs_is_an_error_not_a_crash() {
    let out = run_script("fg\necho still-here\n");
    assert_eq!(out.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&out.stdout).contains("still-here"));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no such job"));
}

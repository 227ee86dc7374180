use anyhow::Result;
use rsh_types::Context;
use std::io::{BufRead, Write};
use tracing::debug;

use crate::shell::Shell;

const PROMPT: &str = "rsh$ ";

/// The read-eval loop, shared by interactive and piped-script use.
/// Returns the status of the last evaluated line once input ends.
pub fn run(shell: &mut Shell, ctx: &Context) -> Result<i32> {
    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        shell.report_finished(ctx)?;
        if ctx.interactive {
            let mut out = std::io::stdout();
            out.write_all(PROMPT.as_bytes())?;
            out.flush()?;
        }

        line.clear();
        if read_line(&mut stdin.lock(), &mut line)? == 0 {
            break;
        }
        if let Err(err) = shell.eval(ctx, &line) {
            ctx.write_stderr(&format!("rsh: {err:#}"))?;
            shell.last_status = 1;
        }
    }

    debug!("end of input, terminating remaining jobs");
    shell.shutdown();
    Ok(shell.last_status)
}

/// `read_line` that retries when signal delivery interrupts the read.
fn read_line(reader: &mut impl BufRead, buf: &mut String) -> std::io::Result<usize> {
    loop {
        match reader.read_line(buf) {
            Ok(n) => return Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_line_passes_through_lines_and_eof() {
        let mut input = std::io::Cursor::new(b"echo hi\n".to_vec());
        let mut buf = String::new();
        assert_eq!(read_line(&mut input, &mut buf).unwrap(), 8);
        assert_eq!(buf, "echo hi\n");

        buf.clear();
        assert_eq!(read_line(&mut input, &mut buf).unwrap(), 0);
        assert!(buf.is_empty());
    }
}

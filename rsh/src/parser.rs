use rsh_types::ShellError;

/// Pipeline stage ceiling.
pub const MAX_STAGES: usize = 8;
/// Per-stage argument ceiling.
pub const MAX_ARGS: usize = 64;
/// Bound on the command-line snapshot kept for `jobs` display.
pub const MAX_CMDLINE: usize = 256;

/// One input line split into pipeline stages. No quoting, no escapes;
/// stages are separated by `|` and tokens by whitespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub stages: Vec<Vec<String>>,
    pub background: bool,
    pub display: String,
}

/// Splits a raw line into stage argument vectors. A single trailing `&`
/// (after trimming) requests background execution and is stripped before
/// stage splitting. Returns `Ok(None)` for blank lines.
pub fn parse_line(input: &str) -> Result<Option<ParsedLine>, ShellError> {
    let mut line = input.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut background = false;
    if let Some(stripped) = line.strip_suffix('&') {
        background = true;
        line = stripped.trim_end();
        if line.is_empty() {
            return Ok(None);
        }
    }

    let display: String = line.chars().take(MAX_CMDLINE).collect();

    let raw_stages: Vec<&str> = line.split('|').collect();
    if raw_stages.len() > MAX_STAGES {
        return Err(ShellError::Parse(format!(
            "too many pipeline stages (max {MAX_STAGES})"
        )));
    }

    let stages: Vec<Vec<String>> = raw_stages
        .iter()
        .map(|stage| stage.split_whitespace().map(str::to_string).collect())
        .collect();

    if stages.len() == 1 && stages[0].is_empty() {
        return Ok(None);
    }
    if stages.iter().any(|argv| argv.is_empty()) {
        return Err(ShellError::Parse("empty command in pipeline".to_string()));
    }
    if let Some(argv) = stages.iter().find(|argv| argv.len() > MAX_ARGS) {
        return Err(ShellError::Parse(format!(
            "too many arguments for '{}' (max {MAX_ARGS})",
            argv[0]
        )));
    }

    Ok(Some(ParsedLine {
        stages,
        background,
        display,
    }))
}

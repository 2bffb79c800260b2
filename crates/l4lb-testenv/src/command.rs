use std::process::{Command, Output};

use crate::error::CommandError;

/// Runs `program args..` and returns the raw output, whatever the exit status.
pub(crate) fn run(program: &str, args: &[&str]) -> Result<Output, CommandError> {
    Command::new(program)
        .args(args)
        .output()
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Runs `program args..` and returns trimmed stdout, failing on non-zero exit.
pub(crate) fn run_ok(program: &str, args: &[&str]) -> Result<String, CommandError> {
    let output = run(program, args)?;
    if !output.status.success() {
        return Err(CommandError::Failed {
            command: render(program, args),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub(crate) fn render(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

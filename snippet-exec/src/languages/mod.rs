//! Guest language implementations

mod python;

pub use python::PythonRuntime;

use crate::error::Error;
use std::path::PathBuf;
use which::which;

pub trait ToolCheck {
    fn required_tools(&self) -> Vec<&str>;

    fn check_tools(&self) -> Result<(), Error> {
        let missing: Vec<_> = self
            .required_tools()
            .iter()
            .filter(|tool| !check_command(tool))
            .map(|s| (*s).to_string())
            .collect();

        if !missing.is_empty() {
            return Err(Error::System(format!(
                "Missing required tools: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_command(cmd: &str) -> bool {
    resolve_command(cmd).is_ok()
}

/// Resolves a command to the executable that will be spawned. Paths are
/// taken as given, bare names are looked up on `PATH`.
pub(crate) fn resolve_command(cmd: &str) -> Result<PathBuf, Error> {
    if cmd.contains('/') {
        let path = PathBuf::from(cmd);
        if path.is_file() {
            return Ok(path);
        }
        return Err(Error::Spawn(format!("Interpreter not found: {}", cmd)));
    }
    which(cmd).map_err(|e| Error::Spawn(format!("Interpreter not found: {} ({})", cmd, e)))
}

/// Removes the longest whitespace prefix shared by every non-blank line.
pub(crate) fn dedent(text: &str) -> String {
    let prefix = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| &line[..line.len() - line.trim_start().len()])
        .reduce(|common, indent| {
            let shared = common
                .char_indices()
                .zip(indent.chars())
                .take_while(|((_, a), b)| a == b)
                .last()
                .map_or(0, |((i, c), _)| i + c.len_utf8());
            &common[..shared]
        })
        .unwrap_or("");

    text.lines()
        .map(|line| line.strip_prefix(prefix).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| !check_command(tool))
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}

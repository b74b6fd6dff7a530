//! Maps a reaped guest to its verdict.

use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;

use crate::{
    executor::GuestLanguage,
    supervisor::GuestOutcome,
    types::{ExecutionResult, ProcessStats, ResourceLimits, Verdict},
};

pub const SUCCESS_MESSAGE: &str = "Code Executed Successfully";

/// Classify a reaped guest. Pure over its inputs; never returns
/// [`Verdict::Error`], since a guest that ran is never an infrastructure
/// fault.
pub fn classify(
    outcome: &GuestOutcome,
    limits: &ResourceLimits,
    language: &dyn GuestLanguage,
) -> ExecutionResult {
    let stdout = outcome.stdout.to_text();
    let stderr = outcome.stderr.to_text();
    let signal = outcome.status.signal();

    let (verdict, message) = if outcome.timed_out {
        // Watchdog first: the kill surfaces as SIGKILL, which is not the
        // guest's doing.
        (
            Verdict::Failure,
            format!(
                "Execution timed out after {} ms",
                limits.wall_clock.as_millis()
            ),
        )
    } else if outcome.status.success() {
        (Verdict::Success, SUCCESS_MESSAGE.to_string())
    } else if let Some(signal) = signal {
        (Verdict::Failure, describe_signal(signal, limits, &stderr))
    } else if language.is_out_of_memory(&stderr) {
        let mut message = format!("Memory limit of {} MB exceeded", limits.memory_mb());
        if let Some(line) = language.final_error_line(&stderr) {
            message.push_str(": ");
            message.push_str(line);
        }
        (Verdict::Failure, message)
    } else if stderr.trim().is_empty() {
        (
            Verdict::Failure,
            format!("Process exited with status {}", exit_code_text(outcome)),
        )
    } else {
        (Verdict::Failure, stderr.clone())
    };

    ExecutionResult {
        verdict,
        message,
        stdout,
        stderr,
        stats: ProcessStats {
            wall_time: outcome.wall_time,
            exit_code: outcome.status.code(),
            signal,
            timed_out: outcome.timed_out,
        },
    }
}

fn describe_signal(signal: i32, limits: &ResourceLimits, stderr: &str) -> String {
    let message = match Signal::try_from(signal) {
        Ok(Signal::SIGXCPU) => {
            return format!(
                "Execution timed out: CPU time limit of {} s exceeded",
                limits.cpu_seconds()
            )
        }
        Ok(Signal::SIGXFSZ) => {
            return format!("File size limit of {} bytes exceeded", limits.file_size)
        }
        Ok(sig) => format!("Process terminated by signal {}", sig.as_str()),
        Err(_) => format!("Process terminated by signal {}", signal),
    };
    if stderr.trim().is_empty() {
        message
    } else {
        format!("{}\n{}", message, stderr)
    }
}

fn exit_code_text(outcome: &GuestOutcome) -> String {
    outcome
        .status
        .code()
        .map_or_else(|| "unknown".to_string(), |code| code.to_string())
}

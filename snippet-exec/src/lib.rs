//! # Snippet Execution
//!
//! Runs untrusted code snippets against their test scripts in a supervised
//! subprocess and reports a verdict: success, failure or error.
//!
//! Each invocation gets its own private work directory and its own guest
//! process. The guest runs under CPU-time, address-space and file-size
//! ceilings applied at process creation, and a wall-clock watchdog kills it
//! if it outlives its timeout. The call always returns, the guest is always
//! reaped and the directory is always removed.
//!
//! ```rust,no_run
//! # async fn demo() {
//! let result = snippet_exec::execute(
//!     "def add(a, b):\n    return a + b",
//!     "assert add(1, 2) == 3",
//!     snippet_exec::DEFAULT_CPU_TIME_LIMIT_MS,
//!     snippet_exec::DEFAULT_MEMORY_LIMIT_MB,
//! )
//! .await;
//! assert!(result.is_success());
//! # }
//! ```

mod config;
mod error;
mod executor;
mod harness;
mod languages;
mod limits;
mod service;
mod supervisor;
mod types;
mod verdict;

#[cfg(test)]
mod tests;

pub use config::SandboxConfig;
pub use error::Error;
pub use executor::{CodeExecutor, GuestLanguage};
pub use harness::{GuestProgram, Harness};
pub use languages::{PythonRuntime, ToolCheck};
pub use limits::{platform_limits, ProcessLimits, RlimitLimits};
pub use service::CodeExecutionService;
pub use supervisor::{Captured, GuestCommand, GuestOutcome, Supervisor};
pub use types::{
    ExecutionRequest, ExecutionResult, HarnessMode, Language, ProcessStats, ResourceLimits,
    Verdict,
};
pub use verdict::{classify, SUCCESS_MESSAGE};

/// Result type for code execution operations
pub type Result<T> = std::result::Result<T, Error>;

pub const DEFAULT_CPU_TIME_LIMIT_MS: u64 = 5000;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;

/// Run `source_code` against `test_code` with the default interpreter and
/// harness. The wall-clock timeout equals the CPU-time limit.
pub async fn execute(
    source_code: &str,
    test_code: &str,
    cpu_time_limit_ms: u64,
    memory_limit_mb: u64,
) -> ExecutionResult {
    let request = ExecutionRequest::new(source_code, test_code).with_limits(
        ResourceLimits::from_millis_and_mb(cpu_time_limit_ms, memory_limit_mb),
    );
    match CodeExecutor::default().execute(&request).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Execution infrastructure fault: {}", e);
            e.into()
        }
    }
}

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    config::SandboxConfig,
    error::Error,
    executor::CodeExecutor,
    types::{ExecutionRequest, ExecutionResult, Verdict},
};

/// Shared entry point for callers: bounds concurrency and turns every
/// infrastructure fault into an `Error` verdict.
#[derive(Clone)]
pub struct CodeExecutionService {
    executor: Arc<CodeExecutor>,
    semaphore: Arc<Semaphore>,
}

impl CodeExecutionService {
    pub fn new(max_concurrent_executions: usize, executor: CodeExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            semaphore: Arc::new(Semaphore::new(max_concurrent_executions)),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(
            config.max_concurrent_executions,
            CodeExecutor::from_config(config),
        )
    }

    pub fn check_tools(&self) -> Result<(), Error> {
        self.executor.check_tools()
    }

    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        let id = Uuid::new_v4();
        let span = info_span!("execution", %id, language = ?request.language, harness = %request.harness);
        self.execute_inner(request).instrument(span).await
    }

    async fn execute_inner(&self, request: ExecutionRequest) -> ExecutionResult {
        // Acquire execution permit
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Failed to acquire execution permit: {}", e);
                return Error::System(format!("Failed to acquire execution permit: {}", e))
                    .into();
            }
        };

        debug!(
            "Starting execution: {} bytes of code, {} bytes of tests",
            request.source_code.len(),
            request.test_code.len()
        );

        match self.executor.execute(&request).await {
            Ok(result) => {
                match result.verdict {
                    Verdict::Success => info!(
                        "Execution succeeded in {} ms",
                        result.stats.wall_time.as_millis()
                    ),
                    _ => info!(
                        "Execution failed in {} ms (timed out: {})",
                        result.stats.wall_time.as_millis(),
                        result.stats.timed_out
                    ),
                }
                result
            }
            Err(e) => {
                error!("Execution infrastructure fault: {}", e);
                e.into()
            }
        }
    }

    pub fn get_available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

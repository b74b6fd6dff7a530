use std::time::Instant;

use crate::{
    execute, languages::skip_if_not_available, CodeExecutionService, CodeExecutor,
    ExecutionRequest, Verdict,
};

mod sandbox;
mod utils;

use fixtures::{code_samples::*, test_scripts::*};
use utils::defaults::teardown_slack;

fn python_missing() -> bool {
    skip_if_not_available(&["python3"])
}

#[tokio::test]
async fn test_passing_assertions_succeed() {
    if python_missing() {
        return;
    }
    let result = execute(ADD, ADD_PASSES, 5000, 256).await;
    assert_eq!(result.verdict, Verdict::Success, "{}", result.message);
    assert_eq!(result.message, "Code Executed Successfully");
}

#[tokio::test]
async fn test_failing_assertion_is_failure_with_diagnostic() {
    if python_missing() {
        return;
    }
    let result = execute(ADD_BROKEN, ADD_PASSES, 5000, 256).await;
    assert_eq!(result.verdict, Verdict::Failure);
    assert!(result.message.contains("AssertionError"), "{}", result.message);
    assert!(!result.stats.timed_out);
}

#[tokio::test]
async fn test_multiline_snippet_with_several_assertions() {
    if python_missing() {
        return;
    }
    let result = execute(ADD_MULTILINE, ADD_ALL, 5000, 256).await;
    assert_eq!(result.verdict, Verdict::Success, "{}", result.message);
}

#[tokio::test]
async fn test_busy_loop_times_out_within_bound() {
    if python_missing() {
        return;
    }
    let started = Instant::now();
    let result = execute(BUSY_LOOP, CALL_F, 1000, 256).await;
    let elapsed = started.elapsed();

    assert_eq!(result.verdict, Verdict::Failure);
    assert!(result.message.contains("timed out"), "{}", result.message);
    assert!(
        elapsed < std::time::Duration::from_millis(1000) + teardown_slack(),
        "took {:?}",
        elapsed
    );
}

#[tokio::test]
async fn test_blocking_guest_is_killed_by_watchdog() {
    if python_missing() {
        return;
    }
    // Sleeping burns no CPU, so only the watchdog can stop it.
    let started = Instant::now();
    let result = execute(SLEEPER, CALL_NAP, 1000, 256).await;

    assert_eq!(result.verdict, Verdict::Failure);
    assert_eq!(result.message, "Execution timed out after 1000 ms");
    assert!(result.stats.timed_out);
    assert!(started.elapsed() < std::time::Duration::from_millis(1000) + teardown_slack());
}

#[tokio::test]
async fn test_memory_hog_fails_quickly() {
    if python_missing() {
        return;
    }
    let started = Instant::now();
    let result = execute(MEMORY_HOG, CALL_HOG, 5000, 128).await;

    assert_eq!(result.verdict, Verdict::Failure);
    assert!(result.message.contains("Memory limit of 128 MB exceeded"), "{}", result.message);
    assert!(!result.stats.timed_out);
    assert!(started.elapsed() < std::time::Duration::from_secs(5));
}

#[tokio::test]
async fn test_list_allocation_beyond_limit_fails() {
    if python_missing() {
        return;
    }
    let result = execute(LIST_HOG, CALL_LIST_HOG, 5000, 50).await;
    assert_eq!(result.verdict, Verdict::Failure);
}

#[tokio::test]
async fn test_service_and_function_agree() {
    if python_missing() {
        return;
    }
    let service = CodeExecutionService::new(1, CodeExecutor::default());
    let from_service = service
        .execute(ExecutionRequest::new(ADD_BROKEN, ADD_PASSES))
        .await;
    let from_function = execute(ADD_BROKEN, ADD_PASSES, 5000, 256).await;

    // Tracebacks name each run's own directory, so compare the exception.
    let final_line = |stderr: &str| stderr.trim_end().lines().last().map(str::to_owned);
    assert_eq!(from_service.verdict, from_function.verdict);
    assert_eq!(from_service.stats.exit_code, from_function.stats.exit_code);
    assert_eq!(final_line(&from_service.stderr), final_line(&from_function.stderr));
    assert!(
        from_service.message.contains("AssertionError"),
        "{}",
        from_service.message
    );
}

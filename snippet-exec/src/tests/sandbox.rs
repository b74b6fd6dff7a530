use std::time::Instant;
use tempfile::tempdir;
use tokio::time::Duration;

use super::{
    fixtures::sandbox_guests::*,
    python_missing,
    utils::{
        defaults::{default_test_limits, short_timeout_limits, teardown_slack},
        guests::run_inline,
        processes::wait_until_gone,
    },
};
use crate::{
    limits::platform_limits, supervisor::GuestCommand, Error, ResourceLimits, Result, Supervisor,
};

#[tokio::test]
async fn test_sandbox_basic() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let dir = tempdir()?;
    let outcome = run_inline(dir.path(), "print('Hello')", &default_test_limits()).await?;
    assert!(outcome.status.success());
    assert_eq!(outcome.stdout.to_text().trim(), "Hello");
    assert!(outcome.stderr.bytes.is_empty());
    assert!(!outcome.timed_out);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_stdin_is_closed() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let dir = tempdir()?;
    let outcome = run_inline(dir.path(), READ_STDIN, &default_test_limits()).await?;
    assert_eq!(outcome.stdout.to_text().trim(), "''");
    Ok(())
}

#[tokio::test]
async fn test_sandbox_environment_is_cleared() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    std::env::set_var("SNIPPET_EXEC_HOST_SECRET", "leak");
    let dir = tempdir()?;
    let outcome = run_inline(dir.path(), ENV_DUMP, &default_test_limits()).await?;
    let stdout = outcome.stdout.to_text();
    assert!(!stdout.contains("SNIPPET_EXEC_HOST_SECRET"));
    assert!(stdout.contains("PATH"));
    Ok(())
}

#[tokio::test]
async fn test_sandbox_runs_in_work_dir() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let dir = tempdir()?;
    let outcome = run_inline(dir.path(), WRITE_CWD, &default_test_limits()).await?;
    assert!(outcome.status.success());
    let written = std::fs::read_to_string(dir.path().join("scratch.txt"))?;
    assert_eq!(written, "guest data");
    Ok(())
}

#[tokio::test]
async fn test_sandbox_timeout_reaps_guest() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let dir = tempdir()?;
    let started = Instant::now();
    let outcome = run_inline(dir.path(), PID_THEN_SPIN, &short_timeout_limits()).await?;

    assert!(outcome.timed_out);
    assert!(started.elapsed() < Duration::from_millis(1000) + teardown_slack());

    let pid: i32 = outcome.stdout.to_text().trim().parse().unwrap();
    assert!(wait_until_gone(pid, Duration::from_millis(100)).await);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_timeout_kills_process_group() -> Result<()> {
    if python_missing() || super::skip_if_not_available(&["sleep"]) {
        return Ok(());
    }
    let dir = tempdir()?;
    let started = Instant::now();
    let outcome = run_inline(dir.path(), FORK_THEN_HANG, &short_timeout_limits()).await?;

    assert!(outcome.timed_out);
    assert!(started.elapsed() < Duration::from_millis(1000) + teardown_slack());

    let grandchild: i32 = outcome.stdout.to_text().trim().parse().unwrap();
    assert!(wait_until_gone(grandchild, Duration::from_secs(2)).await);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_natural_exit_kills_leftover_children() -> Result<()> {
    if python_missing() || super::skip_if_not_available(&["sleep"]) {
        return Ok(());
    }
    let dir = tempdir()?;
    let started = Instant::now();
    let outcome = run_inline(dir.path(), FORK_THEN_EXIT, &default_test_limits()).await?;

    assert!(outcome.status.success());
    assert!(!outcome.timed_out);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The guest's own output survives even though the child shared its pipes.
    assert!(!outcome.stdout.truncated);
    let stdout = outcome.stdout.to_text();
    let pid: i32 = stdout
        .trim()
        .strip_prefix("spawned ")
        .unwrap_or_else(|| panic!("unexpected stdout {:?}", stdout))
        .parse()
        .unwrap();
    assert!(wait_until_gone(pid, Duration::from_secs(2)).await);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_cpu_limit_raises_sigxcpu() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    use std::os::unix::process::ExitStatusExt;

    // One CPU second, but a generous watchdog so the kernel limit fires first.
    let limits = ResourceLimits::from_millis_and_mb(1000, 256)
        .with_wall_clock(Duration::from_secs(10));
    let dir = tempdir()?;
    let outcome = run_inline(dir.path(), "while True: pass", &limits).await?;

    assert!(!outcome.timed_out);
    let signal = outcome.status.signal();
    assert!(
        signal == Some(nix::sys::signal::Signal::SIGXCPU as i32)
            || signal == Some(nix::sys::signal::Signal::SIGKILL as i32),
        "unexpected status {:?}",
        outcome.status
    );
    assert!(outcome.wall_time < Duration::from_secs(5));
    Ok(())
}

#[tokio::test]
async fn test_sandbox_output_is_capped() -> Result<()> {
    if python_missing() {
        return Ok(());
    }
    let limits = ResourceLimits {
        max_output: 1000,
        ..default_test_limits()
    };
    let dir = tempdir()?;
    let outcome = run_inline(dir.path(), LOUD, &limits).await?;

    assert!(outcome.status.success());
    assert_eq!(outcome.stdout.bytes.len(), 1000);
    assert!(outcome.stdout.truncated);
    Ok(())
}

#[tokio::test]
async fn test_sandbox_spawn_failure_is_error() {
    let dir = tempdir().unwrap();
    let command = GuestCommand {
        program: dir.path().join("no-such-interpreter"),
        args: vec![],
        env: vec![],
        work_dir: dir.path().to_path_buf(),
    };
    let limits = default_test_limits();
    let result = Supervisor::new(platform_limits(&limits), limits.wall_clock, limits.max_output)
        .run(&command)
        .await;
    assert!(matches!(result, Err(Error::Spawn(_))));
}

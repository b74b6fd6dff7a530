pub mod defaults {
    use crate::ResourceLimits;
    use tokio::time::Duration;

    pub fn default_test_limits() -> ResourceLimits {
        ResourceLimits::from_millis_and_mb(5000, 256)
    }

    pub fn short_timeout_limits() -> ResourceLimits {
        ResourceLimits::from_millis_and_mb(1000, 256)
    }

    /// Slack allowed on top of the wall-clock timeout for spawn and teardown.
    pub fn teardown_slack() -> Duration {
        Duration::from_millis(1500)
    }
}

pub mod processes {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    use tokio::time::{sleep, Duration, Instant};

    /// Whether `pid` no longer names a live process. Zombies waiting for
    /// init count as gone.
    pub fn process_gone(pid: i32) -> bool {
        if kill(Pid::from_raw(pid), None).is_err() {
            return true;
        }
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }

    /// Polls until `pid` is gone or `within` elapses.
    pub async fn wait_until_gone(pid: i32, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if process_gone(pid) {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        process_gone(pid)
    }
}

pub mod guests {
    use crate::{
        limits::platform_limits, supervisor::GuestCommand, GuestOutcome, ResourceLimits,
        Result, Supervisor,
    };
    use std::path::Path;

    /// Runs `python3 -c <code>` in `dir` under the supervisor.
    pub async fn run_inline(
        dir: &Path,
        code: &str,
        limits: &ResourceLimits,
    ) -> Result<GuestOutcome> {
        let command = GuestCommand {
            program: which::which("python3")
                .map_err(|e| crate::Error::Spawn(e.to_string()))?,
            args: vec!["-c".into(), code.into()],
            env: vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
            work_dir: dir.to_path_buf(),
        };
        Supervisor::new(platform_limits(limits), limits.wall_clock, limits.max_output)
            .run(&command)
            .await
    }
}

//! Per-process resource ceilings applied to the guest at creation time.

use std::io;
use std::sync::Arc;

use nix::sys::resource::{getrlimit, setrlimit, Resource};

use crate::types::ResourceLimits;

/// Platform hook that lowers the resource limits of a freshly forked child.
///
/// `apply` runs in the child between `fork` and `exec`, so it may only make
/// async-signal-safe calls: no allocation, no locks, no logging.
pub trait ProcessLimits: Send + Sync + 'static {
    fn apply(&self) -> io::Result<()>;
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const MEMORY_RESOURCE: Resource = Resource::RLIMIT_AS;

// RLIMIT_AS is not enforced by every unix kernel; the data segment limit is.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MEMORY_RESOURCE: Resource = Resource::RLIMIT_DATA;

/// `setrlimit(2)` based limits for unix targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitLimits {
    cpu_seconds: u64,
    address_space: u64,
    file_size: u64,
    processes: Option<u64>,
}

impl RlimitLimits {
    pub fn new(limits: &ResourceLimits) -> Self {
        Self {
            cpu_seconds: limits.cpu_seconds(),
            address_space: limits.memory,
            file_size: limits.file_size,
            processes: limits.processes,
        }
    }
}

impl ProcessLimits for RlimitLimits {
    fn apply(&self) -> io::Result<()> {
        // Soft limit raises SIGXCPU, the hard limit one second later is SIGKILL.
        lower(
            Resource::RLIMIT_CPU,
            self.cpu_seconds,
            self.cpu_seconds.saturating_add(1),
        )?;
        lower(MEMORY_RESOURCE, self.address_space, self.address_space)?;
        lower(Resource::RLIMIT_FSIZE, self.file_size, self.file_size)?;
        if let Some(processes) = self.processes {
            lower(Resource::RLIMIT_NPROC, processes, processes)?;
        }
        Ok(())
    }
}

/// Sets a limit without ever trying to raise the inherited hard ceiling,
/// which an unprivileged process is not allowed to do.
fn lower(resource: Resource, soft: u64, hard: u64) -> io::Result<()> {
    let (_, current_hard) = getrlimit(resource).map_err(errno_to_io)?;
    let hard = hard.min(current_hard);
    let soft = soft.min(hard);
    setrlimit(resource, soft, hard).map_err(errno_to_io)
}

fn errno_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// Limits implementation for the target platform.
pub fn platform_limits(limits: &ResourceLimits) -> Arc<dyn ProcessLimits> {
    Arc::new(RlimitLimits::new(limits))
}

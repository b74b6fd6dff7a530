use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

const MIB: u64 = 1024 * 1024;

/// Supported guest languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(Language::Python),
            _ => Err(Error::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// How test code is combined with the snippet under test.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HarnessMode {
    /// Indent the test code into a synthesized entry function and call it.
    #[default]
    WrapAsFunction,
    /// Keep the test code at module level and run every `test*` callable it declares.
    RunAsModule,
}

impl FromStr for HarnessMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wrap-as-function" => Ok(HarnessMode::WrapAsFunction),
            "run-as-module" => Ok(HarnessMode::RunAsModule),
            _ => Err(Error::Config(format!("Unknown harness mode: {}", s))),
        }
    }
}

impl fmt::Display for HarnessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessMode::WrapAsFunction => f.write_str("wrap-as-function"),
            HarnessMode::RunAsModule => f.write_str("run-as-module"),
        }
    }
}

/// Resource limits applied to one guest process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum CPU time
    #[serde(rename = "cpu_time_ms", with = "duration_millis")]
    pub cpu_time: Duration,
    /// Maximum address space (bytes)
    #[serde(rename = "memory_mb", with = "megabytes")]
    pub memory: u64,
    /// Wall-clock budget enforced by the watchdog
    #[serde(rename = "wall_clock_ms", with = "duration_millis")]
    pub wall_clock: Duration,
    /// Maximum size of any file the guest writes (bytes)
    #[serde(rename = "file_size_bytes")]
    pub file_size: u64,
    /// Maximum number of processes for the guest's user, unlimited when unset
    #[serde(rename = "max_processes")]
    pub processes: Option<u64>,
    /// Bytes of stdout and of stderr kept from the guest
    #[serde(rename = "max_output_bytes")]
    pub max_output: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time: Duration::from_millis(5000),
            memory: 256 * MIB,
            wall_clock: Duration::from_millis(5000),
            file_size: 10 * MIB,
            processes: None,
            max_output: MIB as usize,
        }
    }
}

impl ResourceLimits {
    /// Limits in the units upstream callers use. The wall-clock budget
    /// matches the CPU budget.
    pub fn from_millis_and_mb(cpu_time_limit_ms: u64, memory_limit_mb: u64) -> Self {
        Self {
            cpu_time: Duration::from_millis(cpu_time_limit_ms),
            memory: memory_limit_mb.saturating_mul(MIB),
            wall_clock: Duration::from_millis(cpu_time_limit_ms),
            ..Self::default()
        }
    }

    pub fn with_wall_clock(mut self, wall_clock: Duration) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// CPU ceiling in whole seconds, rounded up, as the kernel accounts it.
    pub fn cpu_seconds(&self) -> u64 {
        let secs = self.cpu_time.as_secs() + u64::from(self.cpu_time.subsec_nanos() > 0);
        secs.max(1)
    }

    pub fn memory_mb(&self) -> u64 {
        self.memory / MIB
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.cpu_time.is_zero() {
            return Err(Error::InvalidRequest("CPU time limit must be positive".into()));
        }
        if self.memory == 0 {
            return Err(Error::InvalidRequest("Memory limit must be positive".into()));
        }
        if self.wall_clock < self.cpu_time {
            return Err(Error::InvalidRequest(format!(
                "Wall-clock timeout ({} ms) must not be shorter than the CPU time limit ({} ms)",
                self.wall_clock.as_millis(),
                self.cpu_time.as_millis()
            )));
        }
        Ok(())
    }
}

/// Code execution request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Guest language
    #[serde(default = "default_language")]
    pub language: Language,
    /// Snippet under test
    pub source_code: String,
    /// Test script exercising the snippet
    pub test_code: String,
    /// How the test script is combined with the snippet
    #[serde(default)]
    pub harness: HarnessMode,
    /// Resource ceilings for the guest
    #[serde(default)]
    pub limits: ResourceLimits,
}

fn default_language() -> Language {
    Language::Python
}

impl ExecutionRequest {
    pub fn new(source_code: impl Into<String>, test_code: impl Into<String>) -> Self {
        Self {
            language: Language::Python,
            source_code: source_code.into(),
            test_code: test_code.into(),
            harness: HarnessMode::default(),
            limits: ResourceLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_harness(mut self, harness: HarnessMode) -> Self {
        self.harness = harness;
        self
    }
}

/// Three-way outcome of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Success,
    Failure,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Success => f.write_str("success"),
            Verdict::Failure => f.write_str("failure"),
            Verdict::Error => f.write_str("error"),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    /// Time between spawn and reap
    #[serde(rename = "wall_time_ms", with = "duration_millis")]
    pub wall_time: Duration,
    /// Exit code when the guest exited normally
    pub exit_code: Option<i32>,
    /// Terminating signal when the guest was killed
    pub signal: Option<i32>,
    /// Whether the watchdog killed the guest
    pub timed_out: bool,
}

/// Execution result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(rename = "result")]
    pub verdict: Verdict,
    pub message: String,
    /// Captured guest stdout, possibly truncated
    #[serde(default)]
    pub stdout: String,
    /// Captured guest stderr, possibly truncated
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub stats: ProcessStats,
}

impl ExecutionResult {
    /// Result for an infrastructure fault; no guest ran to completion.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            message: message.into(),
            stdout: String::new(),
            stderr: String::new(),
            stats: ProcessStats::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }
}

impl From<Error> for ExecutionResult {
    fn from(err: Error) -> Self {
        ExecutionResult::error(err.to_string())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod megabytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::MIB;

    pub fn serialize<S>(bytes: &u64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(bytes / MIB)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mb = u64::deserialize(deserializer)?;
        Ok(mb.saturating_mul(MIB))
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{
    error::Error,
    types::{HarnessMode, ResourceLimits},
};

/// Sandbox settings, usually read from a TOML file.
///
/// ```toml
/// interpreter = "python3"
/// harness = "run-as-module"
/// max_concurrent_executions = 4
///
/// [limits]
/// cpu_time_ms = 2000
/// memory_mb = 128
/// wall_clock_ms = 3000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter command or path
    pub interpreter: String,
    /// Harness mode used when a request does not name one
    pub harness: HarnessMode,
    /// Maximum number of guests running at once
    pub max_concurrent_executions: usize,
    /// Parent directory for per-request work directories
    pub work_root: Option<PathBuf>,
    /// Limits used when a request does not carry its own
    pub limits: ResourceLimits,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            harness: HarnessMode::default(),
            max_concurrent_executions: 10,
            work_root: None,
            limits: ResourceLimits::default(),
        }
    }
}

impl SandboxConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, Error> {
        let table: toml::Table =
            toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        let wall_clock_set = table
            .get("limits")
            .and_then(|limits| limits.get("wall_clock_ms"))
            .is_some();
        let mut config: SandboxConfig = table
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(e.to_string()))?;
        // The watchdog follows the CPU budget unless configured separately.
        if !wall_clock_set {
            config.limits.wall_clock = config.limits.cpu_time;
        }
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.interpreter.trim().is_empty() {
            return Err(Error::Config("interpreter must not be empty".to_string()));
        }
        if self.max_concurrent_executions == 0 {
            return Err(Error::Config(
                "max_concurrent_executions must be at least 1".to_string(),
            ));
        }
        self.limits
            .validate()
            .map_err(|e| Error::Config(format!("invalid limits: {}", e)))
    }
}

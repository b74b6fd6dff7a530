use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::{
    config::SandboxConfig,
    error::Error,
    harness::Harness,
    languages::{resolve_command, PythonRuntime, ToolCheck},
    limits::platform_limits,
    supervisor::{GuestCommand, Supervisor},
    types::{ExecutionRequest, ExecutionResult, HarnessMode, Language},
    verdict::classify,
};

/// Trait for guest language runtimes: an interpreter invoked as a subprocess
/// on a single synthesized program file.
#[async_trait]
pub trait GuestLanguage: ToolCheck + Send + Sync {
    /// Get the file extension for guest files
    fn file_extension(&self) -> &str;

    /// Get the interpreter command
    fn run_command(&self) -> &str;

    /// Arguments passed to the interpreter to run the guest file
    fn run_args(&self, guest_file: &Path) -> Vec<OsString>;

    /// Extra environment for the guest, on top of the sandbox's minimal one
    fn environment(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Combine the snippet and its tests into one runnable program
    fn render(&self, source_code: &str, test_code: &str, mode: HarnessMode) -> String;

    /// Write the rendered program into the work directory
    async fn write_program(&self, work_dir: &Path, program: &str) -> Result<PathBuf, Error> {
        let path = work_dir.join(format!("guest.{}", self.file_extension()));
        fs::write(&path, program)
            .await
            .map_err(|e| Error::Sandbox(format!("Failed to write guest program: {}", e)))?;
        Ok(path)
    }

    /// Last exception line of an interpreter traceback, if any
    fn final_error_line<'a>(&self, _stderr: &'a str) -> Option<&'a str> {
        None
    }

    /// Whether the guest died from failing to allocate memory
    fn is_out_of_memory(&self, _stderr: &str) -> bool {
        false
    }
}

/// Runs one request end to end: harness, supervisor, classification.
pub struct CodeExecutor {
    python: PythonRuntime,
    harness: Harness,
}

impl Default for CodeExecutor {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl CodeExecutor {
    /// Create a new code executor
    pub fn new(interpreter: Option<String>, work_root: Option<PathBuf>) -> Self {
        Self {
            python: PythonRuntime::new(interpreter),
            harness: Harness::new(work_root),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self::new(Some(config.interpreter.clone()), config.work_root.clone())
    }

    /// Check that every guest runtime's tools are installed
    pub fn check_tools(&self) -> Result<(), Error> {
        self.python.check_tools()
    }

    /// Execute a request. `Err` means an infrastructure fault; anything the
    /// guest does is folded into the returned result.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, Error> {
        request.limits.validate()?;

        let language = self.runtime(request.language);
        let interpreter = resolve_command(language.run_command())?;

        let program = self.harness.build(language, request).await?;

        let mut env = vec![
            ("PATH".to_string(), "/usr/bin:/bin:/usr/local/bin".to_string()),
            (
                "HOME".to_string(),
                program.root_dir().to_string_lossy().into_owned(),
            ),
        ];
        env.extend(language.environment());

        let command = GuestCommand {
            program: interpreter,
            args: language.run_args(program.entry()),
            env,
            work_dir: program.root_dir().to_path_buf(),
        };
        debug!("Guest command: {:?}", command);

        let supervisor = Supervisor::new(
            platform_limits(&request.limits),
            request.limits.wall_clock,
            request.limits.max_output,
        );
        let outcome = supervisor.run(&command).await?;

        // `program` is dropped after this, removing the work directory.
        Ok(classify(&outcome, &request.limits, language))
    }

    fn runtime(&self, language: Language) -> &dyn GuestLanguage {
        match language {
            Language::Python => &self.python,
        }
    }
}

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use snippet_exec::{
    CodeExecutionService, ExecutionRequest, HarnessMode, SandboxConfig, Verdict,
};
use snippet_runner::{create_app, run_server};
use std::{net::SocketAddr, path::PathBuf, process::ExitCode, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML file with sandbox settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Server address to listen on
        #[arg(short, long, default_value = "0.0.0.0:3000")]
        addr: SocketAddr,
    },
    /// Run one snippet against its tests and print the result as JSON
    Run {
        /// File with the snippet under test
        #[arg(long)]
        code: PathBuf,
        /// File with the test script
        #[arg(long)]
        tests: PathBuf,
    },
}

/// Settings that take precedence over the config file
#[derive(Args, Debug)]
struct Overrides {
    /// Interpreter command or path
    #[arg(long, global = true)]
    interpreter: Option<String>,

    /// How tests are combined with the snippet
    #[arg(long, global = true, value_parser = parse_mode)]
    mode: Option<HarnessMode>,

    /// Maximum number of concurrent executions
    #[arg(short, long, global = true)]
    max_concurrent: Option<usize>,

    /// CPU time limit in milliseconds
    #[arg(long, global = true)]
    cpu_time_limit_ms: Option<u64>,

    /// Wall-clock timeout in milliseconds, defaults to the CPU time limit
    #[arg(long, global = true)]
    wall_clock_timeout_ms: Option<u64>,

    /// Memory limit in megabytes
    #[arg(long, global = true)]
    memory_limit_mb: Option<u64>,

    /// File size limit in bytes
    #[arg(long, global = true)]
    file_size_limit: Option<u64>,

    /// Maximum number of processes
    #[arg(long, global = true)]
    max_processes: Option<u64>,
}

fn parse_mode(value: &str) -> Result<HarnessMode, String> {
    value.parse().map_err(|e: snippet_exec::Error| e.to_string())
}

impl Overrides {
    fn apply(&self, config: &mut SandboxConfig) {
        if let Some(interpreter) = &self.interpreter {
            config.interpreter = interpreter.clone();
        }
        if let Some(mode) = self.mode {
            config.harness = mode;
        }
        if let Some(max_concurrent) = self.max_concurrent {
            config.max_concurrent_executions = max_concurrent;
        }
        if let Some(cpu_ms) = self.cpu_time_limit_ms {
            config.limits.cpu_time = Duration::from_millis(cpu_ms);
            config.limits.wall_clock = Duration::from_millis(cpu_ms);
        }
        if let Some(wall_ms) = self.wall_clock_timeout_ms {
            config.limits.wall_clock = Duration::from_millis(wall_ms);
        }
        if let Some(memory_mb) = self.memory_limit_mb {
            config.limits.memory = memory_mb.saturating_mul(1024 * 1024);
        }
        if let Some(file_size) = self.file_size_limit {
            config.limits.file_size = file_size;
        }
        if self.max_processes.is_some() {
            config.limits.processes = self.max_processes;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SandboxConfig::load(path).await?,
        None => SandboxConfig::default(),
    };
    cli.overrides.apply(&mut config);
    config.validate()?;

    match cli.command {
        Command::Serve { addr } => {
            let app = create_app(config).await?;
            run_server(app, addr).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { code, tests } => {
            let source_code = tokio::fs::read_to_string(&code)
                .await
                .with_context(|| format!("Failed to read {}", code.display()))?;
            let test_code = tokio::fs::read_to_string(&tests)
                .await
                .with_context(|| format!("Failed to read {}", tests.display()))?;

            let request = ExecutionRequest::new(source_code, test_code)
                .with_harness(config.harness)
                .with_limits(config.limits.clone());
            let result = CodeExecutionService::from_config(&config)
                .execute(request)
                .await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(match result.verdict {
                Verdict::Success => ExitCode::SUCCESS,
                Verdict::Failure => ExitCode::from(1),
                Verdict::Error => ExitCode::from(2),
            })
        }
    }
}

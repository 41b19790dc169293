//! jobrun - run a single job through the engine from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use jobrun_claude_sdk::ClaudeExecutor;
use jobrun_core::{EngineConfig, JobConfig, JobType};
use jobrun_queue::{QueueOptions, QueueRegistry, AUTOMATION_QUEUE};
use jobrun_worker::{submit, WorkerSet};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// jobrun - queue-backed job runner
#[derive(Parser)]
#[command(name = "jobrun")]
#[command(about = "Run shell, prompt and skill jobs through a task queue", long_about = None)]
struct Cli {
    /// JSON engine config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Queue to run the job on
    #[arg(short, long, default_value = AUTOMATION_QUEUE)]
    queue: String,

    /// Queue concurrency (defaults to the config's automation concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Task priority, higher runs first
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    priority: i32,

    /// Path to the Claude CLI
    #[arg(long)]
    claude_path: Option<String>,

    #[command(subcommand)]
    job: Job,
}

#[derive(Subcommand)]
enum Job {
    /// Run a shell command
    Exec {
        /// Command line passed to the shell
        command: String,

        /// Working directory
        #[arg(long)]
        cwd: Option<String>,

        /// Timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Shell: bash, sh, zsh, pwsh, powershell or cmd
        #[arg(short, long)]
        shell: Option<String>,
    },

    /// Send a prompt to the model
    Ai {
        prompt: String,

        /// Model name or alias
        #[arg(short, long)]
        model: Option<String>,

        /// Timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Invoke a skill
    Skill {
        /// Skill name
        name: String,

        /// Action to perform
        #[arg(short, long)]
        action: Option<String>,

        /// Parameters, as JSON or free text
        #[arg(long)]
        params: Option<String>,

        /// Model name or alias
        #[arg(short, long)]
        model: Option<String>,

        /// Timeout in milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
}

impl Job {
    fn into_config(self) -> (JobType, JobConfig) {
        match self {
            Job::Exec {
                command,
                cwd,
                timeout,
                shell,
            } => {
                let config = JobConfig {
                    cwd,
                    timeout,
                    shell,
                    ..JobConfig::exec(command)
                };
                (JobType::Exec, config)
            }
            Job::Ai {
                prompt,
                model,
                timeout,
            } => {
                let config = JobConfig {
                    model,
                    timeout,
                    ..JobConfig::ai(prompt)
                };
                (JobType::Ai, config)
            }
            Job::Skill {
                name,
                action,
                params,
                model,
                timeout,
            } => {
                // Valid JSON is passed structured, anything else as text.
                let params = params.map(|raw| {
                    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
                });
                let config = JobConfig {
                    action,
                    params,
                    model,
                    timeout,
                    ..JobConfig::skill(name)
                };
                (JobType::Skill, config)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries the result.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobrun=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(path) = cli.claude_path {
        config.claude_path = path;
    }

    let runner = Arc::new(
        ClaudeExecutor::new(config.claude_path.clone()).with_default_model(config.default_model.clone()),
    );
    let workers = WorkerSet::with_defaults(&config, runner);

    let registry = QueueRegistry::new();
    let concurrency = cli.concurrency.unwrap_or(config.automation_concurrency);
    let queue = registry.queue(&cli.queue, QueueOptions::with_concurrency(concurrency));

    let (job_type, job_config) = cli.job.into_config();
    let mut handle = submit(&queue, &workers, job_type, job_config, cli.priority)?;
    let task_id = handle.id().clone();

    info!(task_id = %task_id, job_type = %job_type, queue = queue.name(), "Submitted job");

    let outcome = tokio::select! {
        outcome = &mut handle => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!(task_id = %task_id, "Interrupted, cancelling job");
            queue.cancel(&task_id);
            handle.await
        }
    };

    match outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("Job cancelled");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("Job failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

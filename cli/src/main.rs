use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use anyhow::bail;
use clap::Parser;
use clap::Subcommand;
use loreminer_core::BatchedCallExecutor;
use loreminer_core::Config;
use loreminer_core::ExecutionContext;
use loreminer_core::ExecutorRegistry;
use loreminer_core::JobOrchestrator;
use loreminer_core::LlmExecutionAdapter;
use loreminer_core::spawn_memory_watcher;
use loreminer_state::JobType;
use loreminer_state::RunStatus;
use loreminer_state::StateRuntime;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_STATE_DIR: &str = ".loreminer";

#[derive(Debug, Parser)]
#[clap(name = "loreminer", version, about = "Mine structured lore from media with LLM jobs")]
struct Cli {
    /// Path to loreminer.toml. Defaults are used if the file does not exist.
    #[arg(long, global = true, default_value = "loreminer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a job and print its id.
    Create {
        /// transcribe | mine | evaluate | pipeline
        #[arg(long = "type")]
        job_type: String,
        /// Input reference the job operates on (e.g. an episode id).
        #[arg(long)]
        input: String,
        /// Job config as inline JSON.
        #[arg(long = "config-json", default_value = "{}")]
        config_json: String,
        /// Automatically create a follow-up job of this type on success.
        #[arg(long)]
        chain: Option<String>,
    },
    /// Process a job to completion. Ctrl-C pauses it resumably.
    Run { job_id: String },
    /// Show a job, its latest run, and how many provider calls it made.
    Status { job_id: String },
    /// List all jobs with their latest run state.
    List,
    /// Delete a job and everything recorded for it.
    Delete { job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };
    let state_dir = config
        .state_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
    let state = StateRuntime::init(state_dir).await?;

    match cli.command {
        Command::Create {
            job_type,
            input,
            config_json,
            chain,
        } => {
            let job_type = JobType::parse(&job_type)?;
            let chain = chain.as_deref().map(JobType::parse).transpose()?;
            let job_config: serde_json::Value =
                serde_json::from_str(&config_json).context("parsing --config-json")?;
            let orchestrator = creation_orchestrator(&config, state);
            let job = orchestrator
                .create_job(job_type, &input, job_config, chain)
                .await?;
            println!("{}", job.id);
        }
        Command::Run { job_id } => {
            let orchestrator = run_orchestrator(&config, state)?;
            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; pausing run");
                    signal_cancel.cancel();
                }
            });
            let result = orchestrator.process_job(&job_id, cancel).await?;
            println!("run {} {}", result.run_id, result.status);
            if let Some(next) = result.chained_job_id {
                println!("chained {next}");
            }
            match result.status {
                RunStatus::Failed => {
                    if let Some(message) = result.error_message {
                        eprintln!("{message}");
                    }
                    std::process::exit(1);
                }
                RunStatus::Paused => std::process::exit(2),
                _ => {}
            }
        }
        Command::Status { job_id } => {
            let snapshot = state
                .job_snapshot(&job_id)
                .await?
                .with_context(|| format!("job {job_id} not found"))?;
            print_snapshot(&snapshot);
            for run in state.list_runs_for_job(&job_id).await? {
                let calls = state.count_requests_for_run(&run.id).await?;
                println!(
                    "  run {} {} calls={} error={}",
                    run.id,
                    run.status,
                    calls,
                    run.error_message.as_deref().unwrap_or("-")
                );
            }
        }
        Command::List => {
            for job in state.list_jobs().await? {
                let Some(snapshot) = state.job_snapshot(&job.id).await? else {
                    continue;
                };
                print_snapshot(&snapshot);
            }
        }
        Command::Delete { job_id } => {
            if !state.delete_job(&job_id).await? {
                bail!("job {job_id} not found");
            }
            println!("deleted {job_id}");
        }
    }
    Ok(())
}

/// Orchestrator for commands that never call a provider. No transports are
/// built, so missing API-key variables cannot fail job creation.
fn creation_orchestrator(config: &Config, state: Arc<StateRuntime>) -> JobOrchestrator {
    let context = Arc::new(ExecutionContext::new(config.governor_config()));
    let adapter = LlmExecutionAdapter::new(context, state.clone());
    JobOrchestrator::new(state, adapter, default_registry())
}

/// Orchestrator for commands that dispatch provider calls. Loads every
/// configured provider and starts the memory watcher.
fn run_orchestrator(config: &Config, state: Arc<StateRuntime>) -> Result<JobOrchestrator> {
    let context = Arc::new(ExecutionContext::from_config(config)?);
    let _watcher = spawn_memory_watcher(
        context.governor().clone(),
        context.governor_config().clone(),
        CancellationToken::new(),
    );
    let adapter = LlmExecutionAdapter::new(context, state.clone());
    Ok(JobOrchestrator::new(state, adapter, default_registry()))
}

fn default_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    let executor = Arc::new(BatchedCallExecutor);
    registry.register(JobType::Transcribe, executor.clone());
    registry.register(JobType::Mine, executor.clone());
    registry.register(JobType::Evaluate, executor.clone());
    registry.register(JobType::Pipeline, executor);
    registry
}

fn print_snapshot(snapshot: &loreminer_state::JobSnapshot) {
    let status = snapshot
        .latest_run
        .as_ref()
        .map_or("never-run", |run| run.status.as_str());
    println!(
        "job {} type={} input={} status={} calls={}",
        snapshot.job.id,
        snapshot.job.job_type,
        snapshot.job.input_reference,
        status,
        snapshot.request_count
    );
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    use loreminer_core::GovernorOverrides;
    use loreminer_core::ProviderClass;
    use loreminer_core::ProviderDecl;

    fn config_with_unobtainable_key() -> Config {
        Config {
            state_dir: None,
            governor: GovernorOverrides::default(),
            providers: vec![ProviderDecl {
                name: "cloud".to_string(),
                class: ProviderClass::Remote,
                base_url: "https://api.example.com".to_string(),
                api_key_env: Some("LOREMINER_TEST_KEY_NEVER_SET".to_string()),
                requests_per_minute: None,
                batch_size: None,
                max_attempts: None,
                request_timeout_secs: None,
            }],
        }
    }

    #[tokio::test]
    async fn creating_a_job_needs_no_provider_credentials() {
        let config = config_with_unobtainable_key();
        let state = StateRuntime::init_in_memory().await.unwrap();

        // The run path refuses to start without the key; creation never
        // touches provider transports.
        assert!(run_orchestrator(&config, state.clone()).is_err());

        let orchestrator = creation_orchestrator(&config, state);
        let job = orchestrator
            .create_job(
                JobType::Mine,
                "ep1",
                serde_json::json!({
                    "provider": "cloud",
                    "model": "miner-1",
                    "items": ["line one"]
                }),
                None,
            )
            .await
            .unwrap();
        assert_eq!(job.job_type, JobType::Mine);
    }
}

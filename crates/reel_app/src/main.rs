//! reel - task pipeline runner
//!
//! Usage:
//!   reel init-config [--path reel.toml]     Write a commented default config
//!   reel run --prompt P --genre G           Run tasks through the pipeline
//!   reel stats                              Print queue statistics

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reel_core::config::{ConfigManager, LoadOutcome, Settings};
use reel_core::logging::init_tracing;
use reel_core::models::{TaskInput, TaskRecord, TaskStatus};
use reel_core::orchestrator::PipelineRuntime;
use reel_core::service::SubmitRequest;
use reel_core::stages::StageClients;
use reel_core::store::{MemoryTaskStore, TaskStore};

#[derive(Parser)]
#[command(name = "reel")]
#[command(about = "Story, image and video generation pipeline")]
#[command(version)]
struct Cli {
    /// Config file to read.
    #[arg(short, long, global = true, default_value = "reel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config (or complete an existing one).
    InitConfig {
        /// Where to write; defaults to --config.
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Submit tasks and wait until every one is finished.
    Run {
        #[arg(long)]
        prompt: String,

        #[arg(long)]
        genre: String,

        #[arg(long, default_value = "3")]
        sequences: u32,

        /// Number of identical tasks to submit.
        #[arg(long, default_value = "1")]
        tasks: usize,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        seed: Option<i64>,

        /// How often to poll task status, in milliseconds.
        #[arg(long, default_value = "200")]
        poll_ms: u64,
    },

    /// Print queue statistics of a fresh pipeline.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { path } => cmd_init_config(path.as_deref().unwrap_or(&cli.config)),
        Commands::Run {
            prompt,
            genre,
            sequences,
            tasks,
            user,
            seed,
            poll_ms,
        } => {
            let settings = load_settings(&cli.config)?;
            let _guard = init_tracing(&settings.logging);
            let mut input = TaskInput::new(prompt, genre, sequences);
            input.seed = seed;
            cmd_run(settings, input, tasks, user, Duration::from_millis(poll_ms)).await
        }
        Commands::Stats => {
            let settings = load_settings(&cli.config)?;
            let _guard = init_tracing(&settings.logging);
            cmd_stats(settings).await
        }
    }
}

/// File values (or defaults when the file is absent) plus environment overrides.
fn load_settings(path: &Path) -> Result<Settings> {
    let mut settings = if path.exists() {
        let mut manager = ConfigManager::new(path);
        manager
            .load()
            .with_context(|| format!("Failed to load config: {}", path.display()))?;
        manager.into_settings()
    } else {
        Settings::default()
    };
    settings.apply_env_overrides();

    if let Err(problems) = settings.validate() {
        let lines: Vec<String> = problems.iter().map(ToString::to_string).collect();
        bail!("Invalid settings:\n  {}", lines.join("\n  "));
    }
    Ok(settings)
}

fn open_store(settings: &Settings) -> Result<Arc<dyn TaskStore>> {
    let store = match &settings.store.path {
        Some(path) => MemoryTaskStore::with_persistence(path)
            .with_context(|| format!("Failed to open task store: {path}"))?,
        None => MemoryTaskStore::new(),
    };
    Ok(Arc::new(store))
}

fn cmd_init_config(path: &Path) -> Result<()> {
    let mut manager = ConfigManager::new(path);
    let outcome = manager
        .load_or_create()
        .with_context(|| format!("Failed to initialize config: {}", path.display()))?;
    let what = match outcome {
        LoadOutcome::Created => "Config written to",
        LoadOutcome::Normalized => "Config normalized with defaults:",
        LoadOutcome::Loaded => "Config already complete:",
    };
    println!("{what} {}", manager.path().display());
    Ok(())
}

async fn cmd_run(
    settings: Settings,
    input: TaskInput,
    tasks: usize,
    user: Option<String>,
    poll: Duration,
) -> Result<()> {
    if tasks == 0 {
        bail!("--tasks must be at least 1");
    }

    let store = open_store(&settings)?;
    let clients = StageClients::from_settings(&settings.stages);
    let runtime = PipelineRuntime::start(settings, store, clients);
    let service = runtime.service().clone();

    let mut ids = Vec::with_capacity(tasks);
    for _ in 0..tasks {
        let mut request = SubmitRequest::new(input.clone());
        request.user_id = user.clone();
        let receipt = service.submit(request).await.context("Failed to submit task")?;
        tracing::info!(task_id = %receipt.task_id, job_id = %receipt.job_id, "Submitted");
        ids.push(receipt.task_id);
    }

    let mut records: Vec<TaskRecord> = Vec::with_capacity(ids.len());
    for id in &ids {
        let record = service
            .wait_for_terminal(id, poll)
            .await
            .with_context(|| format!("Failed while waiting for task {id}"))?;
        records.push(record);
    }

    println!("{}", serde_json::to_string_pretty(&records)?);
    println!("{}", serde_json::to_string_pretty(&service.stats())?);

    let failed = records
        .iter()
        .filter(|r| r.status != TaskStatus::Completed)
        .count();
    runtime.shutdown().await;
    if failed > 0 {
        bail!("{failed} of {} task(s) did not complete", records.len());
    }
    Ok(())
}

async fn cmd_stats(settings: Settings) -> Result<()> {
    let store = open_store(&settings)?;
    let clients = StageClients::from_settings(&settings.stages);
    let runtime = PipelineRuntime::start(settings, store, clients);

    println!("{}", serde_json::to_string_pretty(&runtime.service().stats())?);
    let active = runtime.service().active_tasks().await?;
    println!("{} active task(s) in the store", active.len());

    runtime.shutdown().await;
    Ok(())
}

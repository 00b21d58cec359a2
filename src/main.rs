#![forbid(unsafe_code)]

//! `agent-conductor`: agent execution orchestration host.
//!
//! Bootstraps configuration, the `SQLite` store, the process registry, and
//! the execution coordinator, then applies persistence side effects from
//! the coordinator's outbound event channel until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::agent::client::CliAgent;
use agent_conductor::config::GlobalConfig;
use agent_conductor::events::outbound::OutboundEvent;
use agent_conductor::models::execution::{Execution, ExecutionStatus};
use agent_conductor::orchestrator::checkpoint_manager::CheckpointManager;
use agent_conductor::orchestrator::coordinator::{Coordinator, StartExecution};
use agent_conductor::orchestrator::question_gate::QuestionGate;
use agent_conductor::persistence::{db, CheckpointRepo, ExecutionRepo, ProcessRepo, SessionRepo};
use agent_conductor::procs::registry::ProcessRegistry;
use agent_conductor::procs::ProcessEvent;
use agent_conductor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conductor", about = "Agent execution orchestration host", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured default working directory.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Run a single execution with this prompt, then exit.
    #[arg(long)]
    prompt: Option<String>,

    /// Logical task identifier for the one-shot execution.
    #[arg(long, default_value = "default")]
    task_id: String,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conductor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

#[allow(clippy::too_many_lines)]
async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;

    // Override working directory from CLI if provided.
    if let Some(ws) = args.workspace {
        let canonical = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
        config.default_working_dir = canonical;
    }
    let config = Arc::new(config);
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    let pool = db::connect(&config.db_path()).await?;
    info!("database connected");

    let execution_repo = ExecutionRepo::new(Arc::clone(&pool));
    let session_repo = SessionRepo::new(Arc::clone(&pool));
    let checkpoint_repo = CheckpointRepo::new(Arc::clone(&pool));
    let process_repo = ProcessRepo::new(Arc::clone(&pool));

    // ── Build the orchestration core ────────────────────
    let (process_tx, process_rx) = mpsc::channel::<ProcessEvent>(64);
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundEvent>(256);

    let registry = Arc::new(ProcessRegistry::new(config.process.clone(), process_tx));
    let checkpoints = Arc::new(CheckpointManager::new(checkpoint_repo, session_repo));
    let gate = Arc::new(QuestionGate::new());
    let agent = Arc::new(CliAgent::new(config.agent.clone()));

    let coordinator = Arc::new(Coordinator::new(
        agent,
        Arc::clone(&gate),
        Arc::clone(&checkpoints),
        Arc::clone(&registry),
        outbound_tx,
        usize::try_from(config.max_concurrent_executions).unwrap_or(usize::MAX),
    ));

    // ── Reconcile stale state from a prior run ──────────
    reconcile_on_startup(&execution_repo, &process_repo, &registry).await;

    // ── Start event subscribers ─────────────────────────
    let ct = CancellationToken::new();
    let (exit_tx, exit_rx) = oneshot::channel::<Option<i32>>();
    let one_shot_id = args.prompt.as_ref().map(|_| uuid::Uuid::new_v4().to_string());

    let outbound_handle = tokio::spawn(apply_outbound_events(
        outbound_rx,
        execution_repo,
        one_shot_id.clone(),
        exit_tx,
        ct.clone(),
    ));
    let process_handle = tokio::spawn(apply_process_events(
        process_rx,
        process_repo,
        Arc::clone(&registry),
        ct.clone(),
    ));

    // ── Optional one-shot execution ─────────────────────
    if let (Some(prompt), Some(execution_id)) = (args.prompt.clone(), one_shot_id.clone()) {
        let resume_session = checkpoints.resume_options(&args.task_id).await?;
        coordinator
            .start(StartExecution {
                execution_id,
                task_id: args.task_id.clone(),
                working_dir: config.default_working_dir.clone(),
                prompt,
                resume_session,
                aux_files: Vec::new(),
            })
            .await;
    }

    info!("agent-conductor ready");

    // ── Wait for shutdown or one-shot completion ────────
    if one_shot_id.is_some() {
        tokio::select! {
            () = shutdown_signal() => info!("shutdown signal received"),
            code = exit_rx => match code {
                Ok(code) => info!(?code, "one-shot execution finished"),
                Err(_) => warn!("one-shot exit channel dropped"),
            },
        }
    } else {
        shutdown_signal().await;
        info!("shutdown signal received");
    }

    // ── Graceful shutdown ───────────────────────────────
    coordinator.cancel_all().await;
    registry.shutdown().await;
    ct.cancel();
    let _ = tokio::join!(outbound_handle, process_handle);
    info!("agent-conductor shut down");

    Ok(())
}

/// Repair rows left behind by an unclean shutdown.
///
/// Executions still marked running cannot be live anymore; they are moved
/// to `Failed`. Non-terminal background processes are probed and either
/// re-tracked or closed out with a synthesized exit.
async fn reconcile_on_startup(
    execution_repo: &ExecutionRepo,
    process_repo: &ProcessRepo,
    registry: &Arc<ProcessRegistry>,
) {
    let _span = tracing::info_span!("startup_reconcile").entered();

    match execution_repo.list_running().await {
        Ok(stale) => {
            for execution in &stale {
                info!(execution_id = execution.id, "closing stale running execution");
                if let Err(err) = execution_repo
                    .update_status(&execution.id, ExecutionStatus::Failed)
                    .await
                {
                    error!(execution_id = execution.id, %err, "failed to close stale execution");
                }
            }
        }
        Err(err) => error!(%err, "failed to list stale executions"),
    }

    match process_repo.list_active().await {
        Ok(active) => {
            for record in active {
                let id = record.id.clone();
                let pid = record.pid;
                if registry.restore(record).await {
                    info!(process_id = id, pid, "background process re-tracked");
                } else {
                    info!(process_id = id, pid, "background process gone, closing record");
                    if let Err(err) = process_repo.mark_exited(&id, Some(0), None).await {
                        error!(process_id = id, %err, "failed to close process record");
                    }
                }
            }
        }
        Err(err) => error!(%err, "failed to list active processes"),
    }
}

/// Persistence subscriber for the coordinator's outbound channel.
///
/// The coordinator itself is effect-free toward the store; every execution
/// row write happens here, in event arrival order.
async fn apply_outbound_events(
    mut rx: mpsc::Receiver<OutboundEvent>,
    execution_repo: ExecutionRepo,
    one_shot_id: Option<String>,
    exit_tx: oneshot::Sender<Option<i32>>,
    ct: CancellationToken,
) {
    let mut exit_tx = Some(exit_tx);
    loop {
        let event = tokio::select! {
            () = ct.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            OutboundEvent::ExecutionStarted {
                execution_id,
                task_id,
                working_dir,
                prompt,
            } => {
                let execution = Execution::new(execution_id.clone(), task_id, working_dir, prompt);
                if let Err(err) = execution_repo.create(&execution).await {
                    error!(execution_id, %err, "failed to persist execution start");
                }
            }
            OutboundEvent::SessionCaptured {
                execution_id,
                session_id,
            } => {
                if let Err(err) = execution_repo
                    .set_session_id(&execution_id, &session_id)
                    .await
                {
                    error!(execution_id, %err, "failed to persist session id");
                }
            }
            OutboundEvent::ExecutionExit { execution_id, code } => {
                let status = match code {
                    Some(0) => ExecutionStatus::Completed,
                    Some(_) => ExecutionStatus::Failed,
                    None => ExecutionStatus::Cancelled,
                };
                if let Err(err) = execution_repo.update_status(&execution_id, status).await {
                    error!(execution_id, %err, "failed to persist execution exit");
                }
                if one_shot_id.as_deref() == Some(execution_id.as_str()) {
                    if let Some(tx) = exit_tx.take() {
                        let _ = tx.send(code);
                    }
                }
            }
            OutboundEvent::ExecutionError {
                execution_id,
                message,
            } => {
                warn!(execution_id, message, "execution error");
            }
            OutboundEvent::QuestionPrompt {
                execution_id,
                tool_use_id,
                ..
            } => {
                info!(execution_id, tool_use_id, "execution awaiting an answer");
            }
            OutboundEvent::ProcessDiscovered {
                execution_id,
                process_id,
                command,
            } => {
                info!(execution_id, process_id, command, "background process discovered");
            }
            OutboundEvent::ExecutionEvent { execution_id, event } => {
                debug!(execution_id, ?event, "execution event");
            }
        }
    }
}

/// Persistence subscriber for process registry lifecycle events.
async fn apply_process_events(
    mut rx: mpsc::Receiver<ProcessEvent>,
    process_repo: ProcessRepo,
    registry: Arc<ProcessRegistry>,
    ct: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = ct.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ProcessEvent::Started { process_id, .. } => {
                let Some(record) = registry.get(&process_id).await else {
                    continue;
                };
                if let Err(err) = process_repo.create(&record).await {
                    // Re-tracked processes already have a row; anything else
                    // is a real persistence failure.
                    debug!(process_id, %err, "process row insert skipped");
                }
            }
            ProcessEvent::Exited {
                process_id,
                code,
                signal,
            } => {
                if let Err(err) = process_repo
                    .mark_exited(&process_id, code, signal.as_deref())
                    .await
                {
                    error!(process_id, %err, "failed to persist process exit");
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

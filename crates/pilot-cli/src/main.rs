//! Pilot CLI - drive a device-control task from the terminal
//!
//! Usage:
//!   pilot run --task <text> --surface <file>     Run a task on a scripted surface
//!   pilot resume --checkpoint <file> --surface   Continue a checkpointed task
//!   pilot actions                                Print the action vocabulary
//!   pilot init [path]                            Write .pilot/config.toml

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pilot_agent::{vocabulary, AnthropicClient, Model, ReasoningClient, ScriptedReasoning};
use pilot_core::PilotConfig;
use pilot_orchestrator::{
    load_checkpoint, Orchestrator, OrchestratorConfig, ScriptedSurface, State,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CHECKPOINT: &str = ".pilot/checkpoint.json";

#[derive(Parser)]
#[command(name = "pilot")]
#[command(author, version, about = "Agent-driven device control")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task against a scripted surface
    Run {
        /// Natural-language goal
        #[arg(long)]
        task: String,

        /// JSON list of surface trees, one per screen
        #[arg(long, value_name = "FILE")]
        surface: PathBuf,

        /// JSON list of scripted replies (omit to use the Anthropic API)
        #[arg(long, value_name = "FILE")]
        replies: Option<PathBuf>,

        /// Override the configured step limit
        #[arg(short = 'n', long)]
        max_steps: Option<usize>,

        /// Model to use (opus, sonnet, haiku)
        #[arg(short, long)]
        model: Option<CliModel>,

        /// Where Ctrl-C writes the checkpoint
        #[arg(long, default_value = DEFAULT_CHECKPOINT)]
        checkpoint: PathBuf,
    },

    /// Restore a checkpoint and continue its task
    Resume {
        /// Checkpoint written by an interrupted run
        #[arg(long, default_value = DEFAULT_CHECKPOINT)]
        checkpoint: PathBuf,

        /// JSON list of surface trees, one per screen
        #[arg(long, value_name = "FILE")]
        surface: PathBuf,

        /// JSON list of scripted replies (omit to use the Anthropic API)
        #[arg(long, value_name = "FILE")]
        replies: Option<PathBuf>,

        /// Model to use (opus, sonnet, haiku)
        #[arg(short, long)]
        model: Option<CliModel>,
    },

    /// Print the action vocabulary shown to the model
    Actions,

    /// Write a default .pilot/config.toml
    Init {
        /// Project path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

/// CLI-friendly model enum
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliModel {
    Opus,
    Sonnet,
    Haiku,
}

impl From<CliModel> for Model {
    fn from(m: CliModel) -> Self {
        match m {
            CliModel::Opus => Model::Opus,
            CliModel::Sonnet => Model::Sonnet,
            CliModel::Haiku => Model::Haiku,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins when set
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder().with_target(false);
    match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?,
        Err(_) => tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?,
    }

    match cli.command {
        Commands::Run {
            task,
            surface,
            replies,
            max_steps,
            model,
            checkpoint,
        } => cmd_run(task, surface, replies, max_steps, model, checkpoint).await,
        Commands::Resume {
            checkpoint,
            surface,
            replies,
            model,
        } => cmd_resume(checkpoint, surface, replies, model).await,
        Commands::Actions => cmd_actions(),
        Commands::Init { path } => cmd_init(path),
    }
}

async fn cmd_run(
    task: String,
    surface: PathBuf,
    replies: Option<PathBuf>,
    max_steps: Option<usize>,
    model: Option<CliModel>,
    checkpoint: PathBuf,
) -> Result<()> {
    let config = load_config()?;
    let mut orchestrator_config = OrchestratorConfig::from(&config);
    if let Some(max_steps) = max_steps {
        orchestrator_config.run = orchestrator_config.run.with_max_steps(max_steps);
    }

    let mut orchestrator =
        build_orchestrator(&config, orchestrator_config, &surface, replies.as_deref(), model)
            .await?
            .with_checkpoint_path(&checkpoint);

    let mut states = orchestrator.subscribe();
    states.mark_unchanged();
    let task_id = orchestrator.start(task.clone()).await?;
    info!("Task {}: {}", task_id, task);

    let state = supervise(&mut orchestrator, states, &checkpoint).await;
    report(&orchestrator, &state);
    outcome(state)
}

async fn cmd_resume(
    checkpoint: PathBuf,
    surface: PathBuf,
    replies: Option<PathBuf>,
    model: Option<CliModel>,
) -> Result<()> {
    let config = load_config()?;
    let saved = load_checkpoint(&checkpoint)
        .await
        .with_context(|| format!("Failed to load checkpoint {:?}", checkpoint))?;
    println!(
        "Resuming task {} ({}) after step {}",
        saved.task.id, saved.task.goal, saved.step
    );

    let mut orchestrator = build_orchestrator(
        &config,
        OrchestratorConfig::from(&config),
        &surface,
        replies.as_deref(),
        model,
    )
    .await?
    .with_checkpoint_path(&checkpoint);

    orchestrator.restore(saved).await?;
    let mut states = orchestrator.subscribe();
    states.mark_unchanged();
    orchestrator.resume().await?;

    let state = supervise(&mut orchestrator, states, &checkpoint).await;
    report(&orchestrator, &state);
    outcome(state)
}

fn cmd_actions() -> Result<()> {
    println!("{}", vocabulary());
    Ok(())
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing Pilot in {:?}", path);

    PilotConfig::write_default(&path).context("Failed to write config")?;

    println!("Initialized Pilot in {:?}", path);
    println!("Created:");
    println!("  .pilot/config.toml");
    Ok(())
}

fn load_config() -> Result<PilotConfig> {
    PilotConfig::load_or_default(Path::new(".")).context("Failed to load .pilot/config.toml")
}

async fn build_orchestrator(
    config: &PilotConfig,
    orchestrator_config: OrchestratorConfig,
    surface: &Path,
    replies: Option<&Path>,
    model: Option<CliModel>,
) -> Result<Orchestrator> {
    let content = tokio::fs::read_to_string(surface)
        .await
        .with_context(|| format!("Failed to read surface file {:?}", surface))?;
    let surface = Arc::new(ScriptedSurface::from_json(&content).context("Failed to parse surface JSON")?);

    let reasoning: Arc<dyn ReasoningClient> = match replies {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read replies file {:?}", path))?;
            Arc::new(ScriptedReasoning::from_json(&content).context("Failed to parse replies JSON")?)
        }
        None => {
            let mut settings = config.model.clone();
            if let Some(model) = model {
                settings.default = Model::from(model).to_string();
            }
            Arc::new(AnthropicClient::from_settings(&settings).context(
                "No API key found. Set PILOT_API_KEY or ANTHROPIC_API_KEY, or pass --replies",
            )?)
        }
    };

    Ok(
        Orchestrator::new(surface.clone(), surface, reasoning, orchestrator_config)
            .with_activity_log(".pilot"),
    )
}

/// Wait for the task to end; the first Ctrl-C pauses and checkpoints, the second cancels
///
/// `states` must be subscribed before the task starts so no change is missed.
async fn supervise(
    orchestrator: &mut Orchestrator,
    mut states: watch::Receiver<State>,
    checkpoint: &Path,
) -> State {
    let mut interrupted = false;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                if state.is_terminal() || state == State::Idle {
                    break;
                }
                if interrupted && state == State::Paused {
                    println!("Paused. Checkpoint written to {:?}", checkpoint);
                    println!("Continue with: pilot resume --checkpoint {:?} --surface <file>", checkpoint);
                    orchestrator.cancel().await;
                    return State::Paused;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Ctrl-C handler unavailable: {}", e);
                    break;
                }
                if interrupted {
                    println!("Cancelling");
                    return orchestrator.cancel().await;
                }
                interrupted = true;
                println!("Pausing at the next step (Ctrl-C again to cancel)");
                orchestrator.pause();
            }
        }
    }

    orchestrator.wait().await
}

fn report(orchestrator: &Orchestrator, state: &State) {
    println!();
    for record in orchestrator.history() {
        let actions: Vec<String> = record.decision.actions.iter().map(|a| a.describe()).collect();
        let status = if record.succeeded() { "ok" } else { "failed" };
        println!("Step {}: {} [{}]", record.step, actions.join(", "), status);
        for result in record.results.iter().filter(|r| !r.success) {
            println!("    {}", result.message);
        }
    }
    println!("\nFinal state: {}", state);
}

fn outcome(state: State) -> Result<()> {
    match state {
        State::Error { reason } => bail!("Task failed: {}", reason),
        _ => Ok(()),
    }
}

//! Orchestrator: owns one task at a time and the step loop running it

use pilot_agent::{CircuitBreaker, ReasoningClient};
use pilot_core::{
    Checkpoint, ConversationMessage, LoopState, PilotError, Result, StepRecord, Task, TaskId,
};
use pilot_perception::{ElementRegistry, Perception};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity_logger::ActivityLogger;
use crate::checkpoint::{self, CheckpointStore};
use crate::config::OrchestratorConfig;
use crate::control::RunControl;
use crate::interruption::{Interruption, InterruptionDecision, InterruptionResponse};
use crate::loop_engine::{lock, RunData, SharedRunData, StepLoop};
use crate::state_machine::{Event, State};
use crate::supervisor::{Actuator, ExecutionSupervisor};

/// A spawned step loop
struct ActiveRun {
    control: Arc<RunControl>,
    handle: JoinHandle<State>,
}

/// The main orchestrator struct
///
/// Drives a device-control task through perceive, think and act steps on a
/// spawned tokio task. Exactly one task is active at a time; its state is
/// observable through [`Orchestrator::subscribe`].
pub struct Orchestrator {
    perception: Arc<dyn Perception>,
    actuator: Arc<dyn Actuator>,
    reasoning: Arc<dyn ReasoningClient>,
    config: OrchestratorConfig,
    registry: Arc<ElementRegistry>,
    breaker: Arc<CircuitBreaker>,
    checkpoints: Arc<CheckpointStore>,
    activity: Option<ActivityLogger>,
    state_tx: Arc<watch::Sender<State>>,
    /// Data of the current (or last, or restored) task
    data: Option<SharedRunData>,
    /// Whether `data` may be continued; cleared by cancel
    resumable: bool,
    run: Option<ActiveRun>,
}

impl Orchestrator {
    pub fn new(
        perception: Arc<dyn Perception>,
        actuator: Arc<dyn Actuator>,
        reasoning: Arc<dyn ReasoningClient>,
        config: OrchestratorConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker.threshold, config.breaker.cooldown);
        let (state_tx, _) = watch::channel(State::Idle);
        Self {
            perception,
            actuator,
            reasoning,
            config,
            registry: Arc::new(ElementRegistry::new()),
            breaker: Arc::new(breaker),
            checkpoints: Arc::new(CheckpointStore::new()),
            activity: None,
            state_tx: Arc::new(state_tx),
            data: None,
            resumable: false,
            run: None,
        }
    }

    /// Enable activity logging to `<pilot_dir>/activity.md`
    pub fn with_activity_log(mut self, pilot_dir: impl Into<PathBuf>) -> Self {
        self.activity = Some(ActivityLogger::new(pilot_dir.into()));
        self
    }

    /// Also write every checkpoint to `path`
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoints = Arc::new(CheckpointStore::with_path(path));
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state_tx.subscribe()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Start a new task, cancelling any task in progress
    pub async fn start(&mut self, goal: impl Into<String>) -> Result<TaskId> {
        let goal = goal.into();
        if goal.trim().is_empty() {
            return Err(PilotError::Config("task goal must not be empty".to_string()));
        }

        self.stop_current().await;

        let task = Task::new(goal.clone());
        let task_id = task.id.clone();
        info!("Starting task {}: {}", task_id, goal);

        let data = Arc::new(Mutex::new(RunData::new(task)));
        self.spawn(data, Event::Start { goal });
        Ok(task_id)
    }

    /// Ask the running task to pause at its next step gate
    pub fn pause(&self) -> bool {
        match &self.run {
            Some(run) if !run.handle.is_finished() => run.control.request_pause(),
            _ => false,
        }
    }

    /// Resume a paused task, or continue a stopped or restored one
    pub async fn resume(&mut self) -> Result<()> {
        if let Some(run) = self.run.as_ref().filter(|r| !r.handle.is_finished()) {
            return if run.control.resume() {
                Ok(())
            } else {
                Err(PilotError::Other("task is not paused".to_string()))
            };
        }

        let resumable = self.resumable && self.state() == State::Idle;
        let data = match (&self.data, resumable) {
            (Some(data), true) => data.clone(),
            _ => return Err(PilotError::Other("no task to resume".to_string())),
        };

        self.stop_current().await;
        let step = {
            let mut guard = lock(&data);
            guard.loop_state.stopped = false;
            guard.loop_state.step
        };
        info!("Continuing task at step {}", step + 1);
        self.spawn(data, Event::Restore { step });
        Ok(())
    }

    /// Discard in-flight work and go to `Idle` without a checkpoint
    ///
    /// A cancelled task cannot be resumed.
    pub async fn cancel(&mut self) -> State {
        self.resumable = false;
        if let Some(run) = self.run.take() {
            run.control.cancel();
            let state = join(run.handle).await;
            debug!("Cancelled run ended in {}", state);
        }
        self.state_tx.send_replace(State::Idle);
        State::Idle
    }

    /// React to an interruption per its classification
    pub async fn interrupt(&mut self, interruption: Interruption) -> InterruptionDecision {
        let decision = interruption.classify();
        info!(
            "Interruption {}: {:?} (continue: {})",
            interruption, decision.response, decision.should_continue
        );

        match decision.response {
            InterruptionResponse::WaitForResume | InterruptionResponse::WaitForUnlock => {
                self.pause();
            }
            InterruptionResponse::Continue => {
                if let Err(e) = self.resume().await {
                    debug!("Nothing resumed: {}", e);
                }
            }
            InterruptionResponse::Stop => {
                self.cancel().await;
            }
            InterruptionResponse::RequestPermissions => {
                if let Some(run) = &self.run {
                    run.control.request_stop();
                }
            }
        }

        decision
    }

    /// Replace the task with a checkpoint's state
    ///
    /// Cancels any running task. The restored task stays `Idle` until
    /// [`Orchestrator::resume`], which continues at `checkpoint.step + 1`.
    pub async fn restore(&mut self, checkpoint: Checkpoint) -> Result<()> {
        checkpoint::validate(&checkpoint)?;
        self.stop_current().await;

        info!(
            "Restored task {} at step {}",
            checkpoint.task_id(),
            checkpoint.step
        );
        self.data = Some(Arc::new(Mutex::new(RunData::from_checkpoint(checkpoint))));
        self.resumable = true;
        self.state_tx.send_replace(State::Idle);
        Ok(())
    }

    /// Checkpoint of the current task as it stands now
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.data.as_ref().map(|data| lock(data).checkpoint())
    }

    /// Last checkpoint taken by a pause or stop
    pub fn latest_checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoints.latest()
    }

    /// Last checkpoint taken by a pause or stop, consumed
    pub fn take_checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoints.take()
    }

    /// Wait for the running task to end
    pub async fn wait(&mut self) -> State {
        match self.run.take() {
            Some(run) => join(run.handle).await,
            None => self.state(),
        }
    }

    pub fn task(&self) -> Option<Task> {
        self.data.as_ref().map(|data| lock(data).task.clone())
    }

    pub fn loop_state(&self) -> Option<LoopState> {
        self.data.as_ref().map(|data| lock(data).loop_state.clone())
    }

    pub fn history(&self) -> Vec<StepRecord> {
        self.data
            .as_ref()
            .map(|data| lock(data).history.clone())
            .unwrap_or_default()
    }

    pub fn transcript(&self) -> Vec<ConversationMessage> {
        self.data
            .as_ref()
            .map(|data| lock(data).transcript.clone())
            .unwrap_or_default()
    }

    fn spawn(&mut self, data: SharedRunData, start: Event) {
        let control = Arc::new(RunControl::new());
        let supervisor = ExecutionSupervisor::new(
            self.actuator.clone(),
            self.registry.clone(),
            self.config.retry.clone(),
            self.config.recovery.clone(),
        )
        .with_perception(self.perception.clone(), self.config.run.max_elements);

        let step_loop = StepLoop::new(
            self.perception.clone(),
            self.reasoning.clone(),
            self.breaker.clone(),
            self.registry.clone(),
            supervisor,
            self.config.run.clone(),
            data.clone(),
        )
        .with_control(control.clone())
        .with_checkpoints(self.checkpoints.clone())
        .with_activity_logger(self.activity.clone())
        .with_state(self.state_tx.clone());

        let handle = tokio::spawn(step_loop.run(start));
        self.data = Some(data);
        self.resumable = true;
        self.run = Some(ActiveRun { control, handle });
    }

    /// Cancel and await the running loop, if any
    async fn stop_current(&mut self) {
        if let Some(run) = self.run.take() {
            if !run.handle.is_finished() {
                info!("Stopping the running task");
                run.control.cancel();
            }
            join(run.handle).await;
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(run) = &self.run {
            run.control.cancel();
        }
    }
}

async fn join(handle: JoinHandle<State>) -> State {
    match handle.await {
        Ok(state) => state,
        Err(e) => {
            warn!("Step loop task failed: {}", e);
            State::Error {
                reason: format!("step loop task failed: {}", e),
            }
        }
    }
}

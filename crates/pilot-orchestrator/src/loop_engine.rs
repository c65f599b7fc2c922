//! Step loop - perceive, decide, act, record
//!
//! One `StepLoop` drives one task from a start (or restore) event to a
//! terminal state, or to `Idle` on cancel and stop requests. Each step:
//! 1. Captures a snapshot through the change detector and replaces the
//!    element registry
//! 2. Stops at the pause gate if a pause was requested
//! 3. Asks the reasoning service for a decision through the circuit breaker
//! 4. Executes the decision's actions in order, stopping at the first failure
//! 5. Appends a step record and decides whether to go on
//!
//! Every transition goes through [`transition`]; the loop only performs the
//! effects it returns.

use pilot_agent::{parse_decision, CircuitBreaker, ReasoningClient};
use pilot_core::{
    Action, ActionResult, Checkpoint, ConversationMessage, Decision, LoopState, PilotError,
    Result, Snapshot, StepRecord, Task,
};
use pilot_perception::{ChangeDetector, ElementRegistry, Perception};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::activity_logger::ActivityLogger;
use crate::checkpoint::{self, CheckpointStore};
use crate::config::LoopConfig;
use crate::control::RunControl;
use crate::prompt;
use crate::state_machine::{transition, Effect, Event, State, StepOutcome};
use crate::supervisor::ExecutionSupervisor;

/// Everything a checkpoint captures about a task
#[derive(Debug, Clone, PartialEq)]
pub struct RunData {
    pub task: Task,
    pub loop_state: LoopState,
    pub history: Vec<StepRecord>,
    pub transcript: Vec<ConversationMessage>,
}

impl RunData {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            loop_state: LoopState::default(),
            history: Vec::new(),
            transcript: Vec::new(),
        }
    }

    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            task: checkpoint.task,
            loop_state: checkpoint.loop_state,
            history: checkpoint.history,
            transcript: checkpoint.transcript,
        }
    }

    pub fn checkpoint(&self) -> Checkpoint {
        checkpoint::capture(
            &self.task,
            &self.loop_state,
            &self.history,
            &self.transcript,
        )
    }
}

/// Run data shared between a step loop and its orchestrator
pub type SharedRunData = Arc<Mutex<RunData>>;

pub(crate) fn lock(data: &SharedRunData) -> MutexGuard<'_, RunData> {
    data.lock().unwrap_or_else(|e| e.into_inner())
}

/// What the reasoning step produced
enum Thinking {
    Decided(Decision, u32),
    /// No decision this step; go back to perceiving
    Retry,
    Stop,
}

/// Drives one task
pub struct StepLoop {
    perception: Arc<dyn Perception>,
    reasoning: Arc<dyn ReasoningClient>,
    breaker: Arc<CircuitBreaker>,
    registry: Arc<ElementRegistry>,
    detector: ChangeDetector,
    supervisor: ExecutionSupervisor,
    config: LoopConfig,
    control: Arc<RunControl>,
    data: SharedRunData,
    checkpoints: Arc<CheckpointStore>,
    activity: Option<ActivityLogger>,
    state_tx: Arc<watch::Sender<State>>,
    state: State,
    system_prompt: String,
}

impl StepLoop {
    /// Create a loop over `data`
    ///
    /// `registry` must be the registry the supervisor binds targets against.
    pub fn new(
        perception: Arc<dyn Perception>,
        reasoning: Arc<dyn ReasoningClient>,
        breaker: Arc<CircuitBreaker>,
        registry: Arc<ElementRegistry>,
        supervisor: ExecutionSupervisor,
        config: LoopConfig,
        data: SharedRunData,
    ) -> Self {
        let system_prompt = prompt::system_prompt(&lock(&data).task);
        let (state_tx, _) = watch::channel(State::Idle);
        Self {
            perception,
            reasoning,
            breaker,
            registry,
            detector: ChangeDetector::new(config.max_elements),
            supervisor,
            config,
            control: Arc::new(RunControl::new()),
            data,
            checkpoints: Arc::new(CheckpointStore::new()),
            activity: None,
            state_tx: Arc::new(state_tx),
            state: State::Idle,
            system_prompt,
        }
    }

    pub fn with_control(mut self, control: Arc<RunControl>) -> Self {
        self.control = control;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_activity_logger(mut self, logger: Option<ActivityLogger>) -> Self {
        self.activity = logger;
        self
    }

    /// Publish state changes on `state_tx`; the loop starts from its value
    pub fn with_state(mut self, state_tx: Arc<watch::Sender<State>>) -> Self {
        self.state = state_tx.borrow().clone();
        self.state_tx = state_tx;
        self
    }

    pub fn control(&self) -> Arc<RunControl> {
        self.control.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state_tx.subscribe()
    }

    /// Run from `start` (a `Start` or `Restore` event) to the end of the task
    pub async fn run(mut self, start: Event) -> State {
        let (task, step) = {
            let data = lock(&self.data);
            (data.task.clone(), data.loop_state.step)
        };
        info!("Running task {} from step {}", task.id, step + 1);

        if let Some(logger) = &self.activity {
            match &start {
                Event::Restore { step } => {
                    logger
                        .log_event(&format!("Resumed from checkpoint at step {}", step))
                        .await
                }
                _ => logger.log_task_start(&task, self.config.max_steps).await,
            }
        }

        self.apply(start).await;

        match self.drive().await {
            Ok(()) => {}
            Err(PilotError::Cancelled) => {
                info!("Task {} cancelled", task.id);
                self.apply(Event::Cancel).await;
            }
            Err(e) => {
                warn!("Task {} failed: {}", task.id, e);
                self.apply(Event::Fail {
                    message: e.to_string(),
                })
                .await;
            }
        }

        let steps = {
            let mut data = lock(&self.data);
            data.loop_state.stopped = true;
            data.loop_state.step
        };
        if let Some(logger) = &self.activity {
            logger.log_task_complete(steps, &self.state).await;
        }

        info!("Task {} ended after {} steps: {}", task.id, steps, self.state);
        self.state
    }

    async fn drive(&mut self) -> Result<()> {
        while self.state.is_active() {
            if self.control.is_cancelled() {
                return Err(PilotError::Cancelled);
            }
            if self.control.stop_requested() {
                self.apply(Event::PermissionRevoked).await;
                return Ok(());
            }

            let started = Instant::now();

            let Some(snapshot) = self.perceive().await? else {
                if !self.state.is_active() {
                    return Ok(());
                }
                self.control.sleep(self.config.step_delay).await?;
                continue;
            };

            // Pause gate
            let snapshot = if self.control.pause_requested() {
                match self.pause_gate().await? {
                    Some(snapshot) => snapshot,
                    None if self.state.is_active() => continue,
                    None => return Ok(()),
                }
            } else {
                snapshot
            };

            let (decision, failures_before) = match self.think(&snapshot).await? {
                Thinking::Decided(decision, failures) => (decision, failures),
                Thinking::Retry => {
                    self.control.sleep(self.config.step_delay).await?;
                    continue;
                }
                Thinking::Stop => return Ok(()),
            };

            let results = self.act(&decision.actions).await?;
            let outcome = self.record(decision, results, &snapshot, started, failures_before);

            let step = lock(&self.data).loop_state.step;
            if let Some(logger) = &self.activity {
                let record = lock(&self.data).history.last().cloned();
                if let Some(record) = record {
                    logger.log_step(&record, self.config.max_steps).await;
                }
            }

            self.apply(Event::StepRecorded { step, outcome }).await;
            if !self.state.is_active() {
                return Ok(());
            }

            self.control.sleep(self.config.step_delay).await?;
        }
        Ok(())
    }

    /// Capture a snapshot and replace the registry
    ///
    /// `None` when perception failed; the failure has been applied.
    async fn perceive(&mut self) -> Result<Option<Arc<Snapshot>>> {
        let captured = self
            .control
            .guard(self.detector.capture(self.perception.as_ref()))
            .await?;

        match captured {
            Ok(capture) => {
                lock(&self.data).loop_state.consecutive_perception_failures = 0;
                let generation = self.registry.replace(&capture.snapshot);
                debug!(
                    "Registry generation {} with {} elements",
                    generation,
                    capture.snapshot.elements.len()
                );
                self.apply(Event::SnapshotReady {
                    elements: capture.snapshot.elements.len(),
                    cache_hit: capture.cache_hit,
                })
                .await;
                Ok(Some(capture.snapshot))
            }
            Err(e) => {
                let attempts = {
                    let mut data = lock(&self.data);
                    data.loop_state.consecutive_perception_failures += 1;
                    data.loop_state.consecutive_perception_failures
                };
                self.apply(Event::PerceptionFailed {
                    reason: e.to_string(),
                    attempts,
                    limit: self.config.max_failures,
                })
                .await;
                Ok(None)
            }
        }
    }

    /// Checkpoint, suspend until resumed, then refresh the snapshot
    ///
    /// `None` when the step should not go on to thinking: a stop arrived while
    /// paused, or the refresh failed.
    async fn pause_gate(&mut self) -> Result<Option<Arc<Snapshot>>> {
        self.apply(Event::Pause).await;
        self.control.mark_paused();
        info!("Paused at step {}", lock(&self.data).loop_state.step + 1);

        self.control.wait_for_resume().await?;

        if self.control.stop_requested() {
            self.apply(Event::PermissionRevoked).await;
            return Ok(None);
        }

        self.apply(Event::Resume).await;

        let refreshed = self
            .control
            .guard(self.detector.capture(self.perception.as_ref()))
            .await?;
        match refreshed {
            Ok(capture) => {
                self.registry.replace(&capture.snapshot);
                if !capture.cache_hit {
                    debug!("Surface changed while paused");
                }
                Ok(Some(capture.snapshot))
            }
            Err(e) => {
                self.apply(Event::RefreshFailed {
                    reason: e.to_string(),
                })
                .await;
                Ok(None)
            }
        }
    }

    /// Ask for a decision and parse it
    async fn think(&mut self, snapshot: &Snapshot) -> Result<Thinking> {
        let (observation, conversation) = {
            let data = lock(&self.data);
            let window = self.config.history_window;
            let recent_start = data.history.len().saturating_sub(window);
            let observation = prompt::observation(
                snapshot,
                data.loop_state.step + 1,
                self.config.max_steps,
                &data.loop_state.last_results,
                &data.history[recent_start..],
            );
            let conversation = prompt::conversation(
                &self.system_prompt,
                &data.transcript,
                window,
                &observation,
            );
            (observation, conversation)
        };

        let reasoning = self.reasoning.clone();
        let reply = self
            .control
            .guard(self.breaker.call(|| reasoning.generate(&conversation)))
            .await?;

        let reply = match reply {
            Ok(reply) => reply,
            Err(PilotError::CircuitOpen { retry_in }) => {
                self.apply(Event::ChannelUnavailable {
                    retry_in_ms: retry_in.as_millis() as u64,
                })
                .await;
                self.control.sleep(retry_in).await?;
                return Ok(Thinking::Retry);
            }
            Err(e) => {
                let failures = self.count_failure();
                self.apply(Event::DecisionFailed {
                    reason: e.to_string(),
                    failures,
                    limit: self.config.max_failures,
                    correctable: false,
                })
                .await;
                return Ok(self.after_failure());
            }
        };

        {
            let mut data = lock(&self.data);
            data.transcript.push(ConversationMessage::user(observation));
            data.transcript.push(ConversationMessage::assistant(reply.clone()));
        }

        match parse_decision(&reply) {
            Ok(decision) => {
                let failures_before = {
                    let mut data = lock(&self.data);
                    let before = data.loop_state.consecutive_failures;
                    data.loop_state.consecutive_failures = 0;
                    before
                };
                self.apply(Event::DecisionReady {
                    actions: decision.actions.len(),
                })
                .await;
                Ok(Thinking::Decided(decision, failures_before))
            }
            Err(e) => {
                let failures = self.count_failure();
                self.apply(Event::DecisionFailed {
                    reason: e.to_string(),
                    failures,
                    limit: self.config.max_failures,
                    correctable: true,
                })
                .await;
                Ok(self.after_failure())
            }
        }
    }

    fn count_failure(&self) -> u32 {
        let mut data = lock(&self.data);
        data.loop_state.consecutive_failures += 1;
        data.loop_state.consecutive_failures
    }

    fn after_failure(&self) -> Thinking {
        if self.state.is_active() {
            Thinking::Retry
        } else {
            Thinking::Stop
        }
    }

    /// Execute actions in order until the first failure, completion or fatal result
    async fn act(&mut self, actions: &[Action]) -> Result<Vec<ActionResult>> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            if self.control.is_cancelled() {
                return Err(PilotError::Cancelled);
            }

            let host_app = lock(&self.data).loop_state.host_app.clone();
            let outcome = self
                .supervisor
                .execute(action, host_app.as_deref(), &self.control)
                .await?;

            if outcome.result.success {
                if let Action::OpenApp { app } = &outcome.action {
                    lock(&self.data).loop_state.host_app = Some(app.clone());
                }
            }

            let stop = !outcome.result.success || outcome.result.done || outcome.result.fatal;
            results.push(outcome.result);
            if stop {
                break;
            }
        }
        Ok(results)
    }

    /// Append the step record and pick the outcome
    fn record(
        &self,
        decision: Decision,
        results: Vec<ActionResult>,
        snapshot: &Snapshot,
        started: Instant,
        failures: u32,
    ) -> StepOutcome {
        let mut data = lock(&self.data);
        let step = data.loop_state.step + 1;

        let outcome = if let Some(done) = results.iter().find(|r| r.done) {
            StepOutcome::Completed {
                message: done.message.clone(),
            }
        } else if let Some(fatal) = results.iter().find(|r| r.fatal) {
            StepOutcome::Fatal {
                message: fatal.message.clone(),
            }
        } else if step >= self.config.max_steps {
            StepOutcome::MaxSteps {
                max: self.config.max_steps,
            }
        } else {
            StepOutcome::Continue
        };

        data.loop_state.step = step;
        data.loop_state.last_decision = Some(decision.clone());
        data.loop_state.last_results = results.clone();
        data.history.push(StepRecord {
            step,
            decision,
            results,
            snapshot: snapshot.reference(),
            timestamp: chrono::Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            failures,
        });

        outcome
    }

    /// Transition, perform the effects, then publish
    ///
    /// Observers that see a state also see its effects (a `Paused` state
    /// always has its checkpoint stored).
    async fn apply(&mut self, event: Event) {
        let current = std::mem::take(&mut self.state);
        let (next, effects) = transition(current, event);
        self.state = next.clone();

        for effect in effects {
            match effect {
                Effect::LogActivity { message } => {
                    info!("{}", message);
                    if let Some(logger) = &self.activity {
                        logger.log_event(&message).await;
                    }
                }
                Effect::InjectCorrection { reason } => {
                    lock(&self.data)
                        .transcript
                        .push(ConversationMessage::user(prompt::correction(&reason)));
                }
                Effect::SaveCheckpoint => {
                    let checkpoint = lock(&self.data).checkpoint();
                    self.checkpoints.store(checkpoint).await;
                }
                Effect::RequestPermissions => {
                    warn!("Permissions revoked; grant them again and resume the task");
                }
            }
        }

        self.state_tx.send_replace(next);
    }
}

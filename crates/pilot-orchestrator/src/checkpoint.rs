//! Checkpoints: snapshot, persistence and validation of a task's run state
//!
//! A checkpoint holds everything needed to continue a task: the task, loop
//! counters, the full step history and the transcript. Persisted as pretty
//! JSON.

use chrono::Utc;
use pilot_core::fail_open::fail_open_with_retries;
use pilot_core::{Checkpoint, ConversationMessage, LoopState, PilotError, Result, StepRecord, Task};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// Build a checkpoint from the run state
pub fn capture(
    task: &Task,
    loop_state: &LoopState,
    history: &[StepRecord],
    transcript: &[ConversationMessage],
) -> Checkpoint {
    Checkpoint {
        task: task.clone(),
        step: loop_state.step,
        loop_state: loop_state.clone(),
        history: history.to_vec(),
        transcript: transcript.to_vec(),
        created_at: Utc::now(),
    }
}

/// Check that a checkpoint is internally consistent
///
/// History must hold exactly `step` records numbered `1..=step`, and the loop
/// counters must agree.
pub fn validate(checkpoint: &Checkpoint) -> Result<()> {
    if checkpoint.history.len() != checkpoint.step {
        return Err(PilotError::Checkpoint(format!(
            "history has {} records but step is {}",
            checkpoint.history.len(),
            checkpoint.step
        )));
    }

    if checkpoint.loop_state.step != checkpoint.step {
        return Err(PilotError::Checkpoint(format!(
            "loop state is at step {} but checkpoint is at step {}",
            checkpoint.loop_state.step, checkpoint.step
        )));
    }

    if let Some((index, record)) = checkpoint
        .history
        .iter()
        .enumerate()
        .find(|(index, record)| record.step != index + 1)
    {
        return Err(PilotError::Checkpoint(format!(
            "history record {} has step index {}",
            index + 1,
            record.step
        )));
    }

    Ok(())
}

/// Save a checkpoint to a JSON file
pub async fn save_checkpoint(checkpoint: &Checkpoint, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(checkpoint)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(path, json)
        .await
        .map_err(|e| PilotError::Checkpoint(format!("Failed to write checkpoint: {}", e)))?;

    debug!("Saved checkpoint at step {} to {:?}", checkpoint.step, path);
    Ok(())
}

/// Load and validate a checkpoint from a JSON file
pub async fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PilotError::Checkpoint(format!("Failed to read checkpoint: {}", e)))?;

    let checkpoint: Checkpoint = serde_json::from_str(&content)
        .map_err(|e| PilotError::Checkpoint(format!("Failed to parse checkpoint JSON: {}", e)))?;

    validate(&checkpoint)?;
    Ok(checkpoint)
}

/// Holds the most recent checkpoint of a run, optionally mirrored to disk
#[derive(Debug, Default)]
pub struct CheckpointStore {
    latest: Mutex<Option<Checkpoint>>,
    path: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also write every stored checkpoint to `path` (fail-open)
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            latest: Mutex::new(None),
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn store(&self, checkpoint: Checkpoint) {
        if let Some(path) = &self.path {
            let written = fail_open_with_retries(
                "checkpoint_autosave",
                || save_checkpoint(&checkpoint, path),
                3,
                Duration::from_millis(100),
            )
            .await;
            if written.is_some() {
                info!("Checkpoint at step {} written to {:?}", checkpoint.step, path);
            }
        }
        *self.lock() = Some(checkpoint);
    }

    /// Most recent checkpoint, left in place
    pub fn latest(&self) -> Option<Checkpoint> {
        self.lock().clone()
    }

    /// Most recent checkpoint, removed so it is consumed once
    pub fn take(&self) -> Option<Checkpoint> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Checkpoint>> {
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

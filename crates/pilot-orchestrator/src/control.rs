//! Run control shared between an orchestrator and its step loop
//!
//! The run state lives in a single `watch` channel: the orchestrator writes
//! requests, the step loop reads them at its gates, and every await point of
//! the loop is raced against cancellation.

use pilot_core::{PilotError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Requested run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Pause at the next step gate
    PauseRequested,
    /// Suspended at the step gate
    Paused,
    /// Checkpoint at the next boundary and stop
    StopRequested,
    /// Abandon in-flight work now
    Cancelled,
}

/// Pause, resume, stop and cancel signalling for one run
#[derive(Debug)]
pub struct RunControl {
    state: watch::Sender<RunState>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Running);
        Self { state }
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Ask the loop to pause at its next gate; false if not running
    pub fn request_pause(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::PauseRequested;
                true
            } else {
                false
            }
        })
    }

    pub fn pause_requested(&self) -> bool {
        self.state() == RunState::PauseRequested
    }

    /// Called by the loop once it has suspended
    pub(crate) fn mark_paused(&self) {
        self.state.send_if_modified(|state| {
            if *state == RunState::PauseRequested {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Clear a pause; false if nothing was paused
    pub fn resume(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(*state, RunState::PauseRequested | RunState::Paused) {
                *state = RunState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Ask the loop to checkpoint and stop at its next boundary
    pub fn request_stop(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == RunState::Cancelled || *state == RunState::StopRequested {
                false
            } else {
                *state = RunState::StopRequested;
                true
            }
        })
    }

    pub fn stop_requested(&self) -> bool {
        self.state() == RunState::StopRequested
    }

    pub fn cancel(&self) {
        self.state.send_replace(RunState::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state() == RunState::Cancelled
    }

    /// Resolves once the run is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        if rx.wait_for(|state| *state == RunState::Cancelled).await.is_err() {
            // Sender is owned by self and cannot be dropped while borrowed
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless the run is cancelled first
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(PilotError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(PilotError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// Cancellable sleep
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return if self.is_cancelled() {
                Err(PilotError::Cancelled)
            } else {
                Ok(())
            };
        }
        self.guard(tokio::time::sleep(duration)).await
    }

    /// Wait until a pause is lifted
    ///
    /// Returns `Ok` when running again or when a stop was requested (the loop
    /// handles the stop at its next boundary), `Err(Cancelled)` on cancel.
    pub async fn wait_for_resume(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| {
                matches!(
                    state,
                    RunState::Running | RunState::StopRequested | RunState::Cancelled
                )
            })
            .await
            .map(|state| *state)
            .map_err(|_| PilotError::Cancelled)?;

        match state {
            RunState::Cancelled => Err(PilotError::Cancelled),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_pause_resume_cycle() {
        let control = RunControl::new();
        assert!(control.request_pause());
        assert!(!control.request_pause());
        assert!(control.pause_requested());

        control.mark_paused();
        assert_eq!(control.state(), RunState::Paused);

        assert!(control.resume());
        assert_eq!(control.state(), RunState::Running);
        assert!(!control.resume());
    }

    #[test]
    fn test_cancel_wins_over_everything() {
        let control = RunControl::new();
        control.request_pause();
        control.cancel();
        assert!(control.is_cancelled());
        assert!(!control.resume());
        assert!(!control.request_stop());
        assert!(!control.request_pause());
    }

    #[tokio::test]
    async fn test_guard_is_interrupted_by_cancel() {
        let control = Arc::new(RunControl::new());
        let canceller = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = control.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(PilotError::Cancelled)));
    }

    #[tokio::test]
    async fn test_guard_passes_output_through() {
        let control = RunControl::new();
        let value = control.guard(async { 42 }).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_wait_for_resume() {
        let control = Arc::new(RunControl::new());
        control.request_pause();
        control.mark_paused();

        let resumer = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            resumer.resume();
        });
        assert!(control.wait_for_resume().await.is_ok());

        control.request_pause();
        control.mark_paused();
        let canceller = control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        assert!(matches!(
            control.wait_for_resume().await,
            Err(PilotError::Cancelled)
        ));
    }
}

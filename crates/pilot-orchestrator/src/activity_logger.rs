//! Activity Logger - Human-readable step logging to `.pilot/activity.md`
//!
//! Provides transparent insight into step loop progress by logging:
//! - Task starts
//! - Each recorded step: thought, actions and their results
//! - Notable events (pauses, corrections, perception failures)
//! - Final task summaries

use chrono::Utc;
use pilot_core::fail_open::fail_open;
use pilot_core::{PilotError, Result, StepRecord, Task};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::state_machine::State;

/// Maximum character length for the decision thought in the log
const ACTIVITY_LOG_PREVIEW_CHARS: usize = 500;

/// Activity logger for step loops
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Create a logger writing `activity.md` inside `pilot_dir`
    pub fn new(pilot_dir: PathBuf) -> Self {
        Self {
            output_path: pilot_dir.join("activity.md"),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.output_path
    }

    /// Log the start of a task, replacing any previous log
    ///
    /// This operation is fail-open - logging failures won't stop the task
    pub async fn log_task_start(&self, task: &Task, max_steps: usize) {
        fail_open("activity_logger::log_task_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

            let content = format!(
                "# Pilot Activity Log\n\n## Task: {}\n**Id**: {}\n**Started**: {}\n**Max Steps**: {}\n\n---\n\n",
                task.goal.lines().next().unwrap_or(&task.goal),
                task.id,
                timestamp,
                max_steps
            );

            if let Some(parent) = self.output_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await?;

            file.write_all(content.as_bytes()).await?;
            file.flush().await?;

            Ok(())
        })
        .await;
    }

    /// Log a recorded step
    ///
    /// This operation is fail-open - logging failures won't stop the task
    pub async fn log_step(&self, record: &StepRecord, max_steps: usize) {
        fail_open("activity_logger::log_step", || async {
            let mut content = String::new();

            content.push_str(&format!(
                "### Step {}/{}\n**Time**: {}\n**Screen**: {} ({} elements{})\n\n",
                record.step,
                max_steps,
                record.timestamp.format("%H:%M:%S"),
                record.snapshot.surface_name,
                record.snapshot.element_count,
                if record.failures > 0 {
                    format!(", after {} failed replies", record.failures)
                } else {
                    String::new()
                }
            ));

            let thought = &record.decision.thought;
            let preview = if thought.chars().count() > ACTIVITY_LOG_PREVIEW_CHARS {
                let truncated: String = thought.chars().take(ACTIVITY_LOG_PREVIEW_CHARS).collect();
                format!("{truncated}...")
            } else {
                thought.to_string()
            };
            if !preview.is_empty() {
                content.push_str("**Thought**:\n> ");
                content.push_str(&preview.replace('\n', "\n> "));
                content.push_str("\n\n");
            }

            content.push_str("**Actions**:\n");
            for (index, action) in record.decision.actions.iter().enumerate() {
                let status = match record.results.get(index) {
                    Some(result) if result.success => format!("OK - {}", result.message),
                    Some(result) => format!("FAILED - {}", result.message),
                    None => "skipped".to_string(),
                };
                content.push_str(&format!("- {}: {}\n", action.describe(), status));
            }
            content.push_str(&format!("\n*{}ms*\n\n---\n\n", record.duration_ms));

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log a one-line event
    ///
    /// This operation is fail-open - logging failures won't stop the task
    pub async fn log_event(&self, message: &str) {
        fail_open("activity_logger::log_event", || async {
            let content = format!("- {} {}\n\n", Utc::now().format("%H:%M:%S"), message);
            self.append_internal(&content).await
        })
        .await;
    }

    /// Log task completion summary
    ///
    /// This operation is fail-open - logging failures won't stop the task
    pub async fn log_task_complete(&self, steps: usize, state: &State) {
        fail_open("activity_logger::log_task_complete", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

            let (icon, outcome) = match state {
                State::Finished { summary } => ("✓", summary.clone()),
                other => ("✗", other.to_string()),
            };

            let content = format!(
                "## Task Summary\n\n\
                **Completed**: {}\n\
                **Total Steps**: {}\n\
                **Outcome**: {} {}\n\n",
                timestamp, steps, icon, outcome
            );

            self.append_internal(&content).await
        })
        .await;
    }

    /// Append content to the activity log (internal, returns Result for fail_open)
    async fn append_internal(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await
            .map_err(|e| PilotError::Other(format!("activity log unavailable: {}", e)))?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

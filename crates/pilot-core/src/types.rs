//! Core type definitions for Pilot orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::action::{Action, Point};

/// Task identifier (uuid v4 string)
pub type TaskId = String;

/// Rectangle in surface coordinates (left/top inclusive, right/bottom exclusive)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn center(&self) -> Point {
        Point::new(
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// An interactive element in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Small integer id, valid only for the snapshot that produced it
    pub id: u32,
    pub bounds: Bounds,
    pub label: String,
    #[serde(rename = "type")]
    pub element_type: String,
}

/// Which directions the surface can still scroll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrollHints {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

/// Structured representation of the surface at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub elements: Vec<Element>,
    /// Free-form description of the surface for the reasoning service
    pub description: String,
    /// Foreground app or window name
    pub surface_name: String,
    pub scroll_hints: ScrollHints,
    /// Surface dimensions (width, height)
    pub width: i32,
    pub height: i32,
    /// Structural fingerprint of the tree this snapshot was parsed from
    pub fingerprint: String,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn element(&self, id: u32) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Lightweight reference stored in step history
    pub fn reference(&self) -> SnapshotRef {
        SnapshotRef {
            fingerprint: self.fingerprint.clone(),
            surface_name: self.surface_name.clone(),
            element_count: self.elements.len(),
        }
    }
}

/// Reference to the snapshot a step was decided on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub fingerprint: String,
    pub surface_name: String,
    pub element_count: usize,
}

/// A natural-language goal for the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub goal: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Parsed reply of the reasoning service for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub thought: String,
    pub next_goal: String,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub actions: Vec<Action>,
}

impl Decision {
    pub fn new(thought: impl Into<String>, actions: Vec<Action>) -> Self {
        Self {
            thought: thought.into(),
            next_goal: String::new(),
            confidence: 1.0,
            actions,
        }
    }
}

/// Outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    /// Task is complete
    pub done: bool,
    /// Worth trying again
    pub retryable: bool,
    /// Task cannot continue
    pub fatal: bool,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl ActionResult {
    /// Create a success result
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            done: false,
            retryable: true,
            fatal: false,
            data: BTreeMap::new(),
        }
    }

    /// Create a failure result (retryable by default)
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::success(message)
        }
    }

    /// Create a success result that completes the task
    pub fn completed(message: impl Into<String>) -> Self {
        Self {
            done: true,
            ..Self::success(message)
        }
    }

    /// Failure that must not be retried
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::failure(message)
        }
    }

    /// Failure that ends the task
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            fatal: true,
            ..Self::failure(message)
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Append-only history entry for one recorded step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based step index
    pub step: usize,
    pub decision: Decision,
    pub results: Vec<ActionResult>,
    pub snapshot: SnapshotRef,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    /// Decision failures that preceded this step
    pub failures: u32,
}

impl StepRecord {
    pub fn succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn completed(&self) -> bool {
        self.results.iter().any(|r| r.done)
    }
}

/// Mutable run counters, owned by the step loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    /// Number of recorded steps
    pub step: usize,
    pub stopped: bool,
    /// Consecutive decision failures (parse or reasoning channel)
    pub consecutive_failures: u32,
    pub consecutive_perception_failures: u32,
    pub last_decision: Option<Decision>,
    pub last_results: Vec<ActionResult>,
    /// App most recently opened by the agent
    pub host_app: Option<String>,
}

impl LoopState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn of the decision conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Everything needed to resume a task with no other in-memory state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub task: Task,
    /// Index of the last recorded step
    pub step: usize,
    pub loop_state: LoopState,
    pub history: Vec<StepRecord>,
    pub transcript: Vec<ConversationMessage>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn task_id(&self) -> &str {
        &self.task.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Target;

    #[test]
    fn test_bounds_geometry() {
        let bounds = Bounds::new(100, 200, 300, 260);
        assert_eq!(bounds.width(), 200);
        assert_eq!(bounds.height(), 60);
        assert_eq!(bounds.center(), Point::new(200, 230));
        assert!(!bounds.is_empty());
        assert!(Bounds::new(5, 5, 5, 10).is_empty());
    }

    #[test]
    fn test_action_result_constructors() {
        let ok = ActionResult::success("tapped");
        assert!(ok.success && ok.retryable && !ok.done && !ok.fatal);

        let done = ActionResult::completed("all done");
        assert!(done.success && done.done);

        let nr = ActionResult::non_retryable("bad params");
        assert!(!nr.success && !nr.retryable && !nr.fatal);

        let fatal = ActionResult::fatal("device gone");
        assert!(!fatal.success && fatal.fatal);
    }

    #[test]
    fn test_snapshot_reference() {
        let snapshot = Snapshot {
            elements: vec![Element {
                id: 1,
                bounds: Bounds::new(0, 0, 10, 10),
                label: "Login".into(),
                element_type: "button".into(),
            }],
            surface_name: "com.example.app".into(),
            fingerprint: "abc".into(),
            ..Default::default()
        };
        let reference = snapshot.reference();
        assert_eq!(reference.element_count, 1);
        assert_eq!(reference.fingerprint, "abc");
        assert_eq!(snapshot.element(1).map(|e| e.label.as_str()), Some("Login"));
        assert!(snapshot.element(2).is_none());
    }

    #[test]
    fn test_checkpoint_json_is_lossless() {
        let task = Task::new("tap the element labeled Login");
        let decision = Decision::new(
            "Login is visible",
            vec![Action::Tap {
                target: Target::Element(1),
            }],
        );
        let record = StepRecord {
            step: 1,
            decision: decision.clone(),
            results: vec![ActionResult::success("tapped").with_data("x", "5")],
            snapshot: SnapshotRef::default(),
            timestamp: Utc::now(),
            duration_ms: 42,
            failures: 0,
        };
        let checkpoint = Checkpoint {
            task,
            step: 1,
            loop_state: LoopState {
                step: 1,
                last_decision: Some(decision),
                ..Default::default()
            },
            history: vec![record],
            transcript: vec![
                ConversationMessage::system("rules"),
                ConversationMessage::user("observation"),
                ConversationMessage::assistant("{\"thought\":\"ok\"}"),
            ],
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, checkpoint);
    }

    #[test]
    fn test_loop_state_reset() {
        let mut state = LoopState {
            step: 4,
            consecutive_failures: 2,
            host_app: Some("Settings".into()),
            ..Default::default()
        };
        state.reset();
        assert_eq!(state, LoopState::default());
    }
}

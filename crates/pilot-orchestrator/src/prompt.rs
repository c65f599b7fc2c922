//! Prompt assembly for decision requests
//!
//! Constructs the messages the reasoning service sees:
//! - A system prompt with the task, the action vocabulary and the reply format
//! - A per-step observation with the snapshot, last results and recent history
//! - A corrective instruction after an unusable reply

use pilot_agent::vocabulary;
use pilot_core::{ActionResult, ConversationMessage, Snapshot, StepRecord, Task};

const REPLY_FORMAT: &str = r#"Reply with a single JSON object and nothing else:

{
  "thought": "what you see and why you act",
  "nextGoal": "what should happen after these actions",
  "confidence": 0.0-1.0,
  "actions": [{"type": "tap", "elementId": 3}]
}

Actions run in order and stop at the first failure. Refer to elements by
their [id] from the latest screen only; ids change between screens.
Use {"type": "finish", "message": "..."} when the task is complete."#;

/// System prompt for a task
pub fn system_prompt(task: &Task) -> String {
    let mut prompt = String::new();

    prompt.push_str("# PILOT - Device control agent\n\n");
    prompt.push_str(
        "You operate an on-screen surface on behalf of a user. Each turn you receive \
         the current screen and decide the next actions.\n\n",
    );

    prompt.push_str("## TASK\n\n");
    prompt.push_str(&task.goal);
    prompt.push_str("\n\n");

    prompt.push_str("## ACTIONS\n\n");
    prompt.push_str(&vocabulary());
    prompt.push('\n');

    prompt.push_str("## REPLY FORMAT\n\n");
    prompt.push_str(REPLY_FORMAT);
    prompt.push('\n');

    prompt
}

/// Observation message for one step
pub fn observation(
    snapshot: &Snapshot,
    step: usize,
    max_steps: usize,
    last_results: &[ActionResult],
    recent: &[StepRecord],
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# Step {} of {}\n\n", step, max_steps));

    prompt.push_str("## SCREEN\n\n");
    prompt.push_str(&snapshot.description);
    prompt.push('\n');

    let hints = snapshot.scroll_hints;
    let scrollable: Vec<&str> = [
        (hints.up, "up"),
        (hints.down, "down"),
        (hints.left, "left"),
        (hints.right, "right"),
    ]
    .iter()
    .filter(|(can, _)| *can)
    .map(|(_, name)| *name)
    .collect();
    if !scrollable.is_empty() {
        prompt.push_str(&format!("Can scroll: {}\n", scrollable.join(", ")));
    }
    prompt.push('\n');

    if !last_results.is_empty() {
        prompt.push_str("## LAST RESULTS\n\n");
        for result in last_results {
            prompt.push_str(&format!(
                "- {}: {}\n",
                if result.success { "OK" } else { "FAILED" },
                result.message
            ));
        }
        prompt.push('\n');
    }

    if !recent.is_empty() {
        prompt.push_str("## RECENT STEPS\n\n");
        for record in recent {
            let actions: Vec<String> = record
                .decision
                .actions
                .iter()
                .map(|a| a.describe())
                .collect();
            prompt.push_str(&format!(
                "- Step {}: {} -> {}\n",
                record.step,
                actions.join(", "),
                if record.succeeded() { "ok" } else { "failed" }
            ));
        }
        prompt.push('\n');
    }

    prompt
}

/// Corrective instruction after a reply that could not be used
pub fn correction(reason: &str) -> String {
    format!(
        "Your previous reply could not be used: {}\n\n\
         Reply again with exactly one JSON object containing \"thought\" and an \
         \"actions\" array. No prose outside the JSON.",
        reason
    )
}

/// Conversation sent to the reasoning service
///
/// The system prompt, the last `window` exchanges of the transcript (two
/// messages each, plus any corrections between them) and the new observation.
pub fn conversation(
    system: &str,
    transcript: &[ConversationMessage],
    window: usize,
    observation: &str,
) -> Vec<ConversationMessage> {
    let keep = window.saturating_mul(2);
    let start = transcript.len().saturating_sub(keep);

    let mut messages = Vec::with_capacity(keep + 2);
    messages.push(ConversationMessage::system(system));
    messages.extend_from_slice(&transcript[start..]);
    messages.push(ConversationMessage::user(observation));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pilot_core::{Action, Bounds, Decision, Element, Role, ScrollHints, SnapshotRef, Target};

    fn snapshot() -> Snapshot {
        Snapshot {
            elements: vec![Element {
                id: 1,
                bounds: Bounds::new(0, 0, 100, 50),
                label: "Login".to_string(),
                element_type: "button".to_string(),
            }],
            description: "1 elements on com.example\n[1] button \"Login\" [0,0][100,50]"
                .to_string(),
            surface_name: "com.example".to_string(),
            scroll_hints: ScrollHints {
                down: true,
                ..ScrollHints::default()
            },
            width: 1080,
            height: 1920,
            fingerprint: "f".to_string(),
        }
    }

    #[test]
    fn test_system_prompt_contains_task_and_vocabulary() {
        let prompt = system_prompt(&Task::new("Log in to the app"));
        assert!(prompt.contains("Log in to the app"));
        assert!(prompt.contains("tap"));
        assert!(prompt.contains("finish"));
        assert!(prompt.contains("\"actions\""));
    }

    #[test]
    fn test_observation_sections() {
        let record = StepRecord {
            step: 1,
            decision: Decision::new(
                "tap login",
                vec![Action::Tap {
                    target: Target::Element(1),
                }],
            ),
            results: vec![ActionResult::failure("element not found")],
            snapshot: SnapshotRef::default(),
            timestamp: Utc::now(),
            duration_ms: 5,
            failures: 0,
        };

        let text = observation(
            &snapshot(),
            2,
            10,
            &record.results,
            std::slice::from_ref(&record),
        );

        assert!(text.contains("# Step 2 of 10"));
        assert!(text.contains("[1] button \"Login\""));
        assert!(text.contains("Can scroll: down"));
        assert!(text.contains("FAILED: element not found"));
        assert!(text.contains("Step 1: tap element 1 -> failed"));
    }

    #[test]
    fn test_observation_omits_empty_sections() {
        let text = observation(&snapshot(), 1, 10, &[], &[]);
        assert!(!text.contains("LAST RESULTS"));
        assert!(!text.contains("RECENT STEPS"));
    }

    #[test]
    fn test_conversation_window() {
        let transcript: Vec<_> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationMessage::user(format!("obs {}", i))
                } else {
                    ConversationMessage::assistant(format!("reply {}", i))
                }
            })
            .collect();

        let messages = conversation("system", &transcript, 2, "now");
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "obs 6");
        assert_eq!(messages[5].content, "now");

        let messages = conversation("system", &transcript, 0, "now");
        assert_eq!(messages.len(), 2);
    }
}

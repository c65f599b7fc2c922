//! End-to-end tests for the orchestrator.
//!
//! These tests run full tasks against a scripted surface and scripted
//! reasoning replies, and check what the loop recorded and actuated.

use async_trait::async_trait;
use pilot_agent::{ReasoningClient, ScriptedReasoning};
use pilot_core::{Action, Bounds, ConversationMessage, Point, Result, ScrollDirection, Target};
use pilot_orchestrator::{
    load_checkpoint, Interruption, LoopConfig, Orchestrator, OrchestratorConfig, ScriptedSurface,
    State,
};
use pilot_perception::SurfaceNode;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const TAP_LOGIN: &str = r#"{"thought":"The Login button is visible","actions":[{"type":"tap","elementId":1}]}"#;
const FINISH: &str = r#"{"thought":"Logged in","actions":[{"type":"finish","message":"logged in"}]}"#;

fn login_screen() -> SurfaceNode {
    login_at(200)
}

/// Login screen with the button's top edge at `top`
fn login_at(top: i32) -> SurfaceNode {
    SurfaceNode::new("root", "window")
        .with_package("com.example.app")
        .with_bounds(Bounds::new(0, 0, 1080, 1920))
        .with_child(
            SurfaceNode::new("login", "button")
                .with_text("Login")
                .with_bounds(Bounds::new(100, top, 300, top + 60))
                .clickable(),
        )
}

fn home_screen() -> SurfaceNode {
    SurfaceNode::new("root", "window")
        .with_package("com.example.app")
        .with_bounds(Bounds::new(0, 0, 1080, 1920))
        .with_child(
            SurfaceNode::new("welcome", "text")
                .with_text("Welcome back")
                .with_bounds(Bounds::new(100, 100, 900, 160)),
        )
}

fn surface() -> Arc<ScriptedSurface> {
    Arc::new(ScriptedSurface::new(vec![login_screen(), home_screen()]))
}

fn orchestrator(
    surface: &Arc<ScriptedSurface>,
    reasoning: Arc<dyn ReasoningClient>,
    run: LoopConfig,
) -> Orchestrator {
    Orchestrator::new(
        surface.clone(),
        surface.clone(),
        reasoning,
        OrchestratorConfig::immediate().with_run(run),
    )
}

fn run_config() -> LoopConfig {
    LoopConfig::default().with_step_delay(Duration::ZERO)
}

/// Never answers
struct SilentReasoning;

#[async_trait]
impl ReasoningClient for SilentReasoning {
    async fn generate(&self, _conversation: &[ConversationMessage]) -> Result<String> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_login_tap_recorded_and_loop_continues() {
    let surface = surface();
    let reasoning = Arc::new(ScriptedReasoning::new([TAP_LOGIN, FINISH]));
    let mut orchestrator = orchestrator(&surface, reasoning.clone(), run_config());

    orchestrator
        .start("tap the element labeled Login")
        .await
        .unwrap();
    let state = orchestrator.wait().await;

    assert_eq!(
        state,
        State::Finished {
            summary: "logged in".to_string()
        }
    );

    let history = orchestrator.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].step, 1);
    assert_eq!(history[0].results.len(), 1);
    assert!(history[0].results[0].success);

    // The loop went back to perceiving and saw the next screen
    assert_eq!(reasoning.requests().len(), 2);
    let second = reasoning.requests()[1].last().unwrap().content.clone();
    assert!(second.contains("Welcome back"));

    assert_eq!(
        surface.executed()[0],
        Action::Tap {
            target: Target::Point(Point::new(200, 230))
        }
    );
}

#[tokio::test]
async fn test_two_unparsable_replies_end_in_error() {
    let surface = surface();
    let reasoning = Arc::new(ScriptedReasoning::new([
        "I think I should tap login",
        "Still thinking about it",
        FINISH,
    ]));
    let mut orchestrator = orchestrator(
        &surface,
        reasoning.clone(),
        run_config().with_max_failures(2),
    );

    orchestrator.start("Log in").await.unwrap();
    let state = orchestrator.wait().await;

    match state {
        State::Error { reason } => assert!(reason.contains("consecutive failures"), "{}", reason),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(reasoning.requests().len(), 2);
    assert_eq!(reasoning.remaining(), 1);
    assert!(orchestrator.history().is_empty());
    assert!(surface.executed().is_empty());
}

#[tokio::test]
async fn test_element_not_found_recovered_by_one_scroll_down() {
    // The scroll moves the Login button further down the page
    let surface = Arc::new(ScriptedSurface::new(vec![
        login_screen(),
        login_at(1200),
        home_screen(),
    ]));
    surface.fail_next("tap", "element not found");
    let reasoning = Arc::new(ScriptedReasoning::new([TAP_LOGIN, FINISH]));
    let mut orchestrator = orchestrator(&surface, reasoning, run_config());

    orchestrator.start("Log in").await.unwrap();
    assert!(matches!(orchestrator.wait().await, State::Finished { .. }));

    let result = &orchestrator.history()[0].results[0];
    assert!(result.success);
    assert_eq!(
        result.data.get("recovery").map(String::as_str),
        Some("scroll_and_retry")
    );

    let executed = surface.executed();
    let scrolls: Vec<_> = executed
        .iter()
        .filter(|a| matches!(a, Action::Scroll { .. }))
        .collect();
    assert_eq!(scrolls.len(), 1);
    assert!(matches!(
        scrolls[0],
        Action::Scroll {
            direction: ScrollDirection::Down,
            ..
        }
    ));
    let names: Vec<_> = executed.iter().map(|a| a.name()).collect();
    assert_eq!(names[..3], ["tap", "scroll", "tap"]);
    assert_eq!(
        executed[2],
        Action::Tap {
            target: Target::Point(Point::new(200, 1230))
        }
    );
}

#[tokio::test]
async fn test_first_failure_stops_the_step() {
    let surface = surface();
    let reasoning = Arc::new(ScriptedReasoning::new([
        r#"{"thought":"try","actions":[{"type":"tap","x":5000,"y":5000},{"type":"back"},{"type":"home"}]}"#,
        FINISH,
    ]));
    let mut orchestrator = orchestrator(&surface, reasoning, run_config());

    orchestrator.start("Log in").await.unwrap();
    assert!(matches!(orchestrator.wait().await, State::Finished { .. }));

    let history = orchestrator.history();
    assert_eq!(history[0].results.len(), 1);
    assert!(!history[0].results[0].success);
    assert!(!history[0].succeeded());

    let executed = surface.executed();
    let names: Vec<_> = executed.iter().map(|a| a.name()).collect();
    assert!(!names.contains(&"back"));
    assert!(!names.contains(&"home"));
}

#[tokio::test]
async fn test_steps_are_monotonic_and_bounded() {
    let surface = surface();
    let back = r#"{"thought":"go back","actions":[{"type":"back"}]}"#;
    let reasoning = Arc::new(ScriptedReasoning::new([back, back, back, back, back]));
    let mut orchestrator = orchestrator(&surface, reasoning.clone(), run_config().with_max_steps(3));

    orchestrator.start("Wander").await.unwrap();
    let state = orchestrator.wait().await;

    assert!(matches!(&state, State::Error { reason } if reason.contains("max steps")));
    let steps: Vec<_> = orchestrator.history().iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![1, 2, 3]);
    assert_eq!(orchestrator.loop_state().unwrap().step, 3);
    assert_eq!(reasoning.remaining(), 2);
}

#[tokio::test]
async fn test_pause_checkpoints_before_thinking() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("checkpoint.json");
    let surface = surface();
    let reasoning = Arc::new(ScriptedReasoning::new([FINISH]));
    let mut orchestrator =
        orchestrator(&surface, reasoning.clone(), run_config()).with_checkpoint_path(&path);

    let mut states = orchestrator.subscribe();
    orchestrator.start("Log in").await.unwrap();
    assert!(orchestrator.pause());

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == State::Paused),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(reasoning.requests().is_empty());
    let checkpoint = orchestrator.latest_checkpoint().unwrap();
    assert_eq!(checkpoint.step, 0);
    assert_eq!(load_checkpoint(&path).await.unwrap(), checkpoint);

    orchestrator.resume().await.unwrap();
    assert!(matches!(orchestrator.wait().await, State::Finished { .. }));
    assert_eq!(reasoning.requests().len(), 1);
}

#[tokio::test]
async fn test_checkpoint_roundtrip_resumes_at_next_step() {
    let back = r#"{"thought":"go back","actions":[{"type":"back"}]}"#;

    let first_surface = surface();
    let mut first = orchestrator(
        &first_surface,
        Arc::new(ScriptedReasoning::new([back, back])),
        run_config().with_max_steps(2),
    );
    first.start("Log in").await.unwrap();
    assert!(matches!(first.wait().await, State::Error { .. }));
    let checkpoint = first.checkpoint().unwrap();
    assert_eq!(checkpoint.step, 2);

    let surface = surface();
    let reasoning = Arc::new(ScriptedReasoning::new([FINISH]));
    let mut second = orchestrator(&surface, reasoning.clone(), run_config().with_max_steps(5));
    second.restore(checkpoint.clone()).await.unwrap();

    assert_eq!(second.state(), State::Idle);
    assert_eq!(second.loop_state().unwrap(), checkpoint.loop_state);
    assert_eq!(second.history(), checkpoint.history);
    assert_eq!(second.transcript(), checkpoint.transcript);

    second.resume().await.unwrap();
    assert!(matches!(second.wait().await, State::Finished { .. }));

    let history = second.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].step, 3);
    assert_eq!(history[..2], checkpoint.history[..]);
    assert_eq!(second.task().unwrap().id, checkpoint.task.id);

    // The resumed request carries the restored transcript
    let request = &reasoning.requests()[0];
    assert!(request.iter().any(|m| m.content.contains("go back")));
}

#[tokio::test]
async fn test_cancel_goes_idle_without_checkpoint() {
    let surface = surface();
    let mut orchestrator = orchestrator(&surface, Arc::new(SilentReasoning), run_config());

    let mut states = orchestrator.subscribe();
    orchestrator.start("Log in").await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == State::Thinking),
    )
    .await
    .unwrap()
    .unwrap();

    let decision = orchestrator.interrupt(Interruption::UserCancel).await;
    assert!(!decision.should_continue);
    assert_eq!(orchestrator.state(), State::Idle);
    assert!(orchestrator.latest_checkpoint().is_none());
    assert!(surface.executed().is_empty());
}

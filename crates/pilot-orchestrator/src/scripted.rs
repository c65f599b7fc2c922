//! Scripted in-memory surface
//!
//! A fixed list of screens that implements both [`Perception`] and
//! [`Actuator`]. Each successful action that changes the surface moves to the
//! next screen (the last one sticks). Failures can be queued per action name
//! and perception outages injected, which makes it the workhorse of the
//! end-to-end tests and of offline CLI runs.

use async_trait::async_trait;
use pilot_core::{Action, ActionResult, PilotError, Result, Target};
use pilot_perception::{Perception, SurfaceNode};
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

use crate::supervisor::Actuator;

#[derive(Debug, Default)]
struct Script {
    screen: usize,
    executed: Vec<Action>,
    /// (action name, failure message), consumed in order
    failures: VecDeque<(String, String)>,
    perception_outages: u32,
}

/// Screens played back in order as actions succeed
#[derive(Debug)]
pub struct ScriptedSurface {
    screens: Vec<SurfaceNode>,
    script: Mutex<Script>,
}

impl ScriptedSurface {
    pub fn new(screens: Vec<SurfaceNode>) -> Self {
        Self {
            screens,
            script: Mutex::new(Script::default()),
        }
    }

    /// Parse a JSON array of surface trees
    pub fn from_json(json: &str) -> Result<Self> {
        let screens: Vec<SurfaceNode> = serde_json::from_str(json)?;
        if screens.is_empty() {
            return Err(PilotError::Config(
                "scripted surface needs at least one screen".to_string(),
            ));
        }
        Ok(Self::new(screens))
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next action named `action` fail with `message`
    pub fn fail_next(&self, action: &str, message: impl Into<String>) {
        self.script()
            .failures
            .push_back((action.to_string(), message.into()));
    }

    /// Make the next `count` tree reads fail
    pub fn fail_perception(&self, count: u32) {
        self.script().perception_outages += count;
    }

    /// Actions received so far, with element targets already bound
    pub fn executed(&self) -> Vec<Action> {
        self.script().executed.clone()
    }

    pub fn screen_index(&self) -> usize {
        self.script().screen
    }

    fn current(&self, script: &Script) -> Result<&SurfaceNode> {
        self.screens
            .get(script.screen)
            .ok_or_else(|| PilotError::Perception("scripted surface has no screens".to_string()))
    }
}

#[async_trait]
impl Perception for ScriptedSurface {
    async fn read_tree(&self) -> Result<SurfaceNode> {
        let mut script = self.script();
        if script.perception_outages > 0 {
            script.perception_outages -= 1;
            return Err(PilotError::Perception(
                "surface tree unavailable".to_string(),
            ));
        }
        self.current(&script).cloned()
    }
}

#[async_trait]
impl Actuator for ScriptedSurface {
    async fn execute(&self, action: &Action) -> Result<ActionResult> {
        let mut script = self.script();
        script.executed.push(action.clone());

        let scripted_failure = match script.failures.front() {
            Some((name, _)) if name == action.name() => script.failures.pop_front(),
            _ => None,
        };
        if let Some((_, message)) = scripted_failure {
            debug!("Scripted failure for {}: {}", action.name(), message);
            return Ok(ActionResult::failure(message));
        }

        if let Some(Target::Point(point)) = action.target() {
            let bounds = self.current(&script)?.bounds;
            let inside = point.x >= bounds.left
                && point.x < bounds.right
                && point.y >= bounds.top
                && point.y < bounds.bottom;
            if !bounds.is_empty() && !inside {
                return Ok(ActionResult::non_retryable(format!(
                    "point {} is outside the surface {}",
                    point, bounds
                )));
            }
        }

        let result = match action {
            Action::Finish { message, success } => {
                ActionResult::completed(message.clone()).with_data("success", success.to_string())
            }
            other => ActionResult::success(other.describe()),
        };

        if action.changes_surface() && script.screen + 1 < self.screens.len() {
            script.screen += 1;
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_core::{Bounds, Point};

    fn screen(name: &str) -> SurfaceNode {
        SurfaceNode::new("root", "window")
            .with_package(name)
            .with_bounds(Bounds::new(0, 0, 1080, 1920))
    }

    #[tokio::test]
    async fn test_screens_advance_on_surface_changes() {
        let surface = ScriptedSurface::new(vec![screen("login"), screen("home")]);
        assert_eq!(surface.read_tree().await.unwrap().package.as_deref(), Some("login"));

        surface
            .execute(&Action::Wait { duration_ms: 10 })
            .await
            .unwrap();
        assert_eq!(surface.screen_index(), 0);

        surface
            .execute(&Action::Tap {
                target: Target::Point(Point::new(10, 10)),
            })
            .await
            .unwrap();
        assert_eq!(surface.screen_index(), 1);

        // Last screen sticks
        surface.execute(&Action::Back).await.unwrap();
        assert_eq!(surface.screen_index(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failures_match_action_name() {
        let surface = ScriptedSurface::new(vec![screen("login")]);
        surface.fail_next("tap", "element not found");

        let back = surface.execute(&Action::Back).await.unwrap();
        assert!(back.success);

        let tap = Action::Tap {
            target: Target::Point(Point::new(5, 5)),
        };
        assert!(!surface.execute(&tap).await.unwrap().success);
        assert!(surface.execute(&tap).await.unwrap().success);
        assert_eq!(surface.executed().len(), 3);
    }

    #[tokio::test]
    async fn test_points_outside_surface_fail() {
        let surface = ScriptedSurface::new(vec![screen("login")]);
        let result = surface
            .execute(&Action::Tap {
                target: Target::Point(Point::new(5000, 5)),
            })
            .await
            .unwrap();
        assert!(!result.success);
        assert!(!result.retryable);
    }

    #[tokio::test]
    async fn test_perception_outage() {
        let surface = ScriptedSurface::new(vec![screen("login")]);
        surface.fail_perception(1);
        assert!(surface.read_tree().await.is_err());
        assert!(surface.read_tree().await.is_ok());
    }

    #[test]
    fn test_from_json() {
        let surface = ScriptedSurface::from_json(
            r#"[{"id":"root","type":"window","bounds":{"left":0,"top":0,"right":100,"bottom":100}}]"#,
        )
        .unwrap();
        assert_eq!(surface.screens.len(), 1);
        assert!(ScriptedSurface::from_json("[]").is_err());
    }
}

//! Execution Supervisor
//!
//! Wraps the execution of one action:
//! 1. Resolve: dynamic actions go through the fallback interpreter, invalid
//!    actions fail without reaching the actuator
//! 2. Bind element targets to points through the current registry
//! 3. Execute, retrying per the classified [`RetryPolicy`]
//! 4. If still failing, apply a heuristic [`RecoveryStrategy`]
//!
//! A recovery scroll moves the surface, so the registry is rebuilt from a
//! fresh capture before the action is bound again. Without a perception
//! source the registry is cleared instead and element targets fail.
//!
//! Actuator errors become failed results; only cancellation propagates.

use async_trait::async_trait;
use pilot_agent::interpret_dynamic;
use pilot_core::{Action, ActionResult, PilotError, Result, Target};
use pilot_perception::{ChangeDetector, ElementRegistry, Perception};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{RecoveryConfig, RetryConfig};
use crate::control::RunControl;
use crate::recovery::{ErrorSignature, RecoveryEngine, RecoveryStrategy};
use crate::retry::classify;

/// Turns actions into input on the controlled surface
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Perform one attempt of `action`
    ///
    /// Element targets have already been bound to points.
    async fn execute(&self, action: &Action) -> Result<ActionResult>;
}

/// Final outcome of one supervised action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// The action as executed (after fallback interpretation)
    pub action: Action,
    pub result: ActionResult,
    /// Actuator calls made for this action, recovery included
    pub attempts: u32,
    pub recovery: Option<RecoveryStrategy>,
}

/// Source used to rebuild the registry after recovery moved the surface
struct SurfaceRefresh {
    perception: Arc<dyn Perception>,
    detector: ChangeDetector,
}

/// Supervises action execution for one run
pub struct ExecutionSupervisor {
    actuator: Arc<dyn Actuator>,
    registry: Arc<ElementRegistry>,
    refresh: Option<SurfaceRefresh>,
    retry: RetryConfig,
    recovery: RecoveryEngine,
}

impl ExecutionSupervisor {
    pub fn new(
        actuator: Arc<dyn Actuator>,
        registry: Arc<ElementRegistry>,
        retry: RetryConfig,
        recovery: RecoveryConfig,
    ) -> Self {
        Self {
            actuator,
            registry,
            refresh: None,
            retry,
            recovery: RecoveryEngine::new(recovery),
        }
    }

    /// Re-capture the surface through `perception` after a recovery scroll
    pub fn with_perception(mut self, perception: Arc<dyn Perception>, max_elements: usize) -> Self {
        self.refresh = Some(SurfaceRefresh {
            perception,
            detector: ChangeDetector::new(max_elements),
        });
        self
    }

    pub fn recovery(&self) -> &RecoveryEngine {
        &self.recovery
    }

    /// Execute one action with retries and recovery
    ///
    /// Returns `Err` only when the run is cancelled.
    #[instrument(skip(self, action, control), fields(action = %action.name()))]
    pub async fn execute(
        &mut self,
        action: &Action,
        host_app: Option<&str>,
        control: &RunControl,
    ) -> Result<ActionOutcome> {
        let resolved = match resolve(action) {
            Ok(resolved) => resolved,
            Err(result) => {
                warn!("{}", result.message);
                self.recovery.record_outcome(false);
                return Ok(ActionOutcome {
                    action: action.clone(),
                    result,
                    attempts: 0,
                    recovery: None,
                });
            }
        };

        let (mut result, mut attempts) = self.execute_with_policy(&resolved, control).await?;
        self.recovery.record_outcome(result.success);

        if result.success || !result.retryable || result.fatal || !self.recovery.enabled() {
            return Ok(ActionOutcome {
                action: resolved,
                result,
                attempts,
                recovery: None,
            });
        }

        let signature = ErrorSignature::new(&result.message, &resolved);
        let strategy = self.recovery.strategy_for(&signature, &resolved, host_app);
        info!(
            "Recovering {} ({}) with {}",
            resolved.name(),
            signature,
            strategy.name()
        );

        if let Some((recovered, calls)) = self.apply(&strategy, &resolved, control).await? {
            attempts += calls;
            result = recovered.with_data("recovery", strategy.name());
        }

        if result.success {
            self.recovery.record_outcome(true);
            self.recovery.remember(signature, strategy.clone());
        }

        Ok(ActionOutcome {
            action: resolved,
            result,
            attempts,
            recovery: Some(strategy),
        })
    }

    /// First attempt plus policy retries
    async fn execute_with_policy(
        &self,
        action: &Action,
        control: &RunControl,
    ) -> Result<(ActionResult, u32)> {
        let mut result = self.attempt(action, control).await?;
        let mut attempts = 1;
        if settled(&result) {
            return Ok((result, attempts));
        }

        let policy = classify(&result.message, action.kind(), &self.retry);
        for retry in 1..=policy.max_attempts() {
            let delay = policy.delay_for(retry);
            debug!(
                "Retrying {} ({}/{}) in {:?}: {}",
                action.name(),
                retry,
                policy.max_attempts(),
                delay,
                result.message
            );
            control.sleep(delay).await?;
            result = self.attempt(action, control).await?;
            attempts += 1;
            if settled(&result) {
                break;
            }
        }

        Ok((result, attempts))
    }

    /// One actuator call with targets bound against the current registry
    async fn attempt(&self, action: &Action, control: &RunControl) -> Result<ActionResult> {
        let bound = match self.bind(action) {
            Ok(bound) => bound,
            Err(result) => return Ok(result),
        };

        match control.guard(self.actuator.execute(&bound)).await? {
            Ok(result) => Ok(result),
            Err(PilotError::Cancelled) => Err(PilotError::Cancelled),
            Err(e) => Ok(ActionResult::failure(e.to_string())),
        }
    }

    fn bind(&self, action: &Action) -> std::result::Result<Action, ActionResult> {
        match action.target() {
            Some(target @ Target::Element(id)) => self
                .registry
                .resolve(target)
                .map(|point| action.with_target(Target::Point(point)))
                .map_err(|_| {
                    ActionResult::failure(format!(
                        "element {} not found in current snapshot",
                        id
                    ))
                }),
            _ => Ok(action.clone()),
        }
    }

    /// Replace the registry with the surface as it is now
    ///
    /// On failure the registry is left empty and the failure is returned.
    async fn refresh_registry(
        &mut self,
        control: &RunControl,
    ) -> Result<std::result::Result<(), ActionResult>> {
        let Some(refresh) = self.refresh.as_mut() else {
            self.registry.clear();
            return Ok(Ok(()));
        };

        let captured = control
            .guard(refresh.detector.capture(refresh.perception.as_ref()))
            .await?;
        match captured {
            Ok(capture) => {
                let generation = self.registry.replace(&capture.snapshot);
                debug!(
                    "Registry generation {} after recovery ({} elements)",
                    generation,
                    capture.snapshot.elements.len()
                );
                Ok(Ok(()))
            }
            Err(e) => {
                self.registry.clear();
                Ok(Err(ActionResult::failure(format!(
                    "could not refresh the surface after scrolling: {}",
                    e
                ))))
            }
        }
    }

    /// Run a recovery strategy; `None` when it did nothing
    async fn apply(
        &mut self,
        strategy: &RecoveryStrategy,
        action: &Action,
        control: &RunControl,
    ) -> Result<Option<(ActionResult, u32)>> {
        match strategy {
            RecoveryStrategy::Retry { attempts, delay } => {
                let mut last = None;
                for attempt in 1..=*attempts {
                    control.sleep(*delay).await?;
                    let result = self.attempt(action, control).await?;
                    let success = result.success;
                    last = Some((result, attempt));
                    if success {
                        break;
                    }
                }
                Ok(last)
            }
            RecoveryStrategy::ScrollAndRetry(direction) => {
                let scroll = Action::Scroll {
                    direction: *direction,
                    target: None,
                };
                let scrolled = self.attempt(&scroll, control).await?;
                if !scrolled.success {
                    warn!("Recovery scroll failed: {}", scrolled.message);
                    return Ok(Some((scrolled, 1)));
                }
                if let Err(failed) = self.refresh_registry(control).await? {
                    warn!("{}", failed.message);
                    return Ok(Some((failed, 1)));
                }
                let result = self.attempt(action, control).await?;
                Ok(Some((result, 2)))
            }
            RecoveryStrategy::RestartApp(app) => {
                self.attempt(&Action::CloseApp { app: app.clone() }, control)
                    .await?;
                let opened = self
                    .attempt(&Action::OpenApp { app: app.clone() }, control)
                    .await?;
                let result = if opened.success {
                    ActionResult::failure(format!(
                        "restarted {} after repeated failures",
                        app
                    ))
                } else {
                    opened
                };
                Ok(Some((result, 2)))
            }
            RecoveryStrategy::AlternativeAction(alternatives) => {
                let mut last = None;
                let mut calls = 0;
                for alternative in alternatives {
                    let result = self.attempt(alternative, control).await?;
                    calls += 1;
                    let success = result.success;
                    last = Some((result, calls));
                    if !success {
                        break;
                    }
                }
                Ok(last)
            }
            RecoveryStrategy::Abandon => Ok(None),
        }
    }
}

/// Success, or a failure that no retry could change
fn settled(result: &ActionResult) -> bool {
    result.success || !result.retryable || result.fatal
}

/// Map dynamic and invalid actions to something executable, or a failure
fn resolve(action: &Action) -> std::result::Result<Action, ActionResult> {
    match action {
        Action::Invalid { name, reason } => Err(ActionResult::non_retryable(format!(
            "invalid action '{}': {}",
            name, reason
        ))),
        Action::Dynamic(dynamic) => interpret_dynamic(dynamic).map_err(ActionResult::non_retryable),
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedSurface;
    use pilot_core::{Bounds, DynamicAction, Point, ScrollDirection};
    use pilot_perception::{parse_tree, SurfaceNode};
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    /// Window with a Login button whose top edge is at `top`
    fn login_at(top: i32) -> SurfaceNode {
        SurfaceNode::new("root", "window")
            .with_package("mail")
            .with_bounds(Bounds::new(0, 0, 1080, 1920))
            .with_child(
                SurfaceNode::new("login", "button")
                    .with_text("Login")
                    .with_bounds(Bounds::new(100, top, 300, top + 60))
                    .clickable(),
            )
    }

    fn blank() -> SurfaceNode {
        SurfaceNode::new("root", "window")
            .with_package("mail")
            .with_bounds(Bounds::new(0, 0, 1080, 1920))
    }

    fn surface() -> Arc<ScriptedSurface> {
        Arc::new(ScriptedSurface::new(vec![login_at(200)]))
    }

    fn supervisor_with(surface: Arc<ScriptedSurface>, retry: RetryConfig) -> ExecutionSupervisor {
        let registry = Arc::new(ElementRegistry::new());
        registry.replace(&parse_tree(&login_at(200), 100));
        ExecutionSupervisor::new(
            surface.clone(),
            registry,
            retry,
            RecoveryConfig {
                slow_retry_delay: Duration::ZERO,
                ..RecoveryConfig::default()
            },
        )
        .with_perception(surface, 100)
    }

    fn supervisor(surface: Arc<ScriptedSurface>) -> ExecutionSupervisor {
        supervisor_with(surface, RetryConfig::immediate())
    }

    fn backoff(retries: u32) -> RetryConfig {
        RetryConfig {
            rate_limit_base_delay: Duration::from_millis(2),
            rate_limit_retries: retries,
            network_base_delay: Duration::from_millis(2),
            network_retries: retries,
            generic_retries: 0,
        }
    }

    fn swipe() -> Action {
        Action::Swipe {
            start: Point::new(500, 1500),
            end: Point::new(500, 500),
            duration_ms: 300,
        }
    }

    fn tap_login() -> Action {
        Action::Tap {
            target: Target::Element(1),
        }
    }

    #[tokio::test]
    async fn test_element_target_bound_to_center() {
        let surface = surface();
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor.execute(&tap_login(), None, &control).await.unwrap();

        assert!(outcome.result.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            surface.executed(),
            vec![Action::Tap {
                target: Target::Point(Point::new(200, 230))
            }]
        );
    }

    #[tokio::test]
    async fn test_not_found_recovers_with_one_scroll() {
        let surface = surface();
        surface.fail_next("tap", "element not found");
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor.execute(&tap_login(), None, &control).await.unwrap();

        assert!(outcome.result.success);
        assert_eq!(
            outcome.recovery,
            Some(RecoveryStrategy::ScrollAndRetry(ScrollDirection::Down))
        );
        let names: Vec<_> = surface.executed().iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["tap", "scroll", "tap"]);
        assert!(matches!(
            surface.executed()[1],
            Action::Scroll {
                direction: ScrollDirection::Down,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_generic_failure_retried_immediately() {
        let surface = surface();
        surface.fail_next("swipe", "gesture glitch");
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor.execute(&swipe(), None, &control).await.unwrap();

        assert!(outcome.result.success);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.recovery.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_backs_off_until_success() {
        let surface = surface();
        surface.fail_next("swipe", "429 too many requests");
        surface.fail_next("swipe", "429 too many requests");
        let mut supervisor = supervisor_with(surface.clone(), backoff(3));
        let control = RunControl::new();

        let started = Instant::now();
        let outcome = supervisor.execute(&swipe(), None, &control).await.unwrap();

        assert!(outcome.result.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(surface.executed().len(), 3);
        // 2ms then 4ms
        assert!(started.elapsed() >= Duration::from_millis(6));
    }

    #[tokio::test]
    async fn test_network_failure_stops_at_retry_cap() {
        let surface = surface();
        for _ in 0..4 {
            surface.fail_next("swipe", "connection refused");
        }
        let mut supervisor = supervisor_with(surface.clone(), backoff(2));
        let control = RunControl::new();

        let outcome = supervisor.execute(&swipe(), None, &control).await.unwrap();

        assert!(!outcome.result.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(surface.executed().len(), 3);
        assert_eq!(outcome.recovery, Some(RecoveryStrategy::Abandon));
    }

    #[tokio::test]
    async fn test_timeout_retries_with_backoff_then_slow_retry() {
        let surface = surface();
        for _ in 0..2 {
            surface.fail_next("swipe", "gesture timed out");
        }
        let mut supervisor = supervisor_with(surface.clone(), backoff(1));
        let control = RunControl::new();

        let outcome = supervisor.execute(&swipe(), None, &control).await.unwrap();

        // One policy retry, then the recovery retry succeeds
        assert!(outcome.result.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.data.get("recovery").map(String::as_str), Some("retry"));
    }

    #[tokio::test]
    async fn test_scroll_recovery_rebinds_against_fresh_capture() {
        let surface = Arc::new(ScriptedSurface::new(vec![login_at(200), login_at(1200)]));
        surface.fail_next("tap", "element not found");
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor.execute(&tap_login(), None, &control).await.unwrap();

        assert!(outcome.result.success);
        let executed = surface.executed();
        assert_eq!(executed.len(), 3);
        assert_eq!(
            executed[2],
            Action::Tap {
                target: Target::Point(Point::new(200, 1230))
            }
        );
    }

    #[tokio::test]
    async fn test_element_gone_after_scroll_fails_retry() {
        let surface = Arc::new(ScriptedSurface::new(vec![login_at(200), blank()]));
        surface.fail_next("tap", "element not found");
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor.execute(&tap_login(), None, &control).await.unwrap();

        assert!(!outcome.result.success);
        assert!(outcome.result.message.contains("element 1 not found"));
        let names: Vec<_> = surface.executed().iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["tap", "scroll"]);
    }

    #[tokio::test]
    async fn test_scroll_without_perception_clears_registry() {
        let surface = Arc::new(ScriptedSurface::new(vec![login_at(200), login_at(1200)]));
        surface.fail_next("tap", "element not found");
        let registry = Arc::new(ElementRegistry::new());
        registry.replace(&parse_tree(&login_at(200), 100));
        let mut supervisor = ExecutionSupervisor::new(
            surface.clone(),
            registry.clone(),
            RetryConfig::immediate(),
            RecoveryConfig::default(),
        );
        let control = RunControl::new();

        let outcome = supervisor.execute(&tap_login(), None, &control).await.unwrap();

        assert!(!outcome.result.success);
        assert!(registry.current().is_empty());
        assert_eq!(surface.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_element_is_not_retried_by_policy() {
        let surface = surface();
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor
            .execute(
                &Action::Tap {
                    target: Target::Element(42),
                },
                None,
                &control,
            )
            .await
            .unwrap();

        assert!(!outcome.result.success);
        assert!(outcome.result.message.contains("element 42 not found"));
        // Recovery scrolls once; id 42 is not on the refreshed surface either
        let names: Vec<_> = surface.executed().iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, vec!["scroll"]);
    }

    #[tokio::test]
    async fn test_invalid_action_never_reaches_actuator() {
        let surface = surface();
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor
            .execute(
                &Action::Invalid {
                    name: "tap".to_string(),
                    reason: "missing required parameter 'target'".to_string(),
                },
                None,
                &control,
            )
            .await
            .unwrap();

        assert!(!outcome.result.success);
        assert!(!outcome.result.retryable);
        assert_eq!(outcome.attempts, 0);
        assert!(surface.executed().is_empty());
    }

    #[tokio::test]
    async fn test_dynamic_action_interpreted_by_shape() {
        let surface = surface();
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let mut params = BTreeMap::new();
        params.insert("text".to_string(), serde_json::json!("hello"));
        let outcome = supervisor
            .execute(
                &Action::Dynamic(DynamicAction {
                    name: "enter_text".to_string(),
                    params,
                }),
                None,
                &control,
            )
            .await
            .unwrap();

        assert!(outcome.result.success);
        assert!(matches!(&outcome.action, Action::Type { text, .. } if text == "hello"));
    }

    #[tokio::test]
    async fn test_unmatched_dynamic_action_is_non_retryable() {
        let surface = surface();
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();

        let outcome = supervisor
            .execute(
                &Action::Dynamic(DynamicAction {
                    name: "teleport".to_string(),
                    params: BTreeMap::new(),
                }),
                None,
                &control,
            )
            .await
            .unwrap();

        assert!(!outcome.result.success);
        assert!(!outcome.result.retryable);
        assert!(surface.executed().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_propagates() {
        let surface = surface();
        let mut supervisor = supervisor(surface.clone());
        let control = RunControl::new();
        control.cancel();

        let result = supervisor.execute(&tap_login(), None, &control).await;
        assert!(matches!(result, Err(PilotError::Cancelled)));
        assert!(surface.executed().is_empty());
    }
}

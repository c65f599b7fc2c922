//! Decision parsing
//!
//! Turns a reasoning reply into a [`Decision`]. Replies are JSON, possibly
//! wrapped in a markdown fence or surrounded by prose.
//!
//! ## Format
//!
//! ```json
//! {
//!   "thought": "The login button is visible",
//!   "nextGoal": "Wait for the home screen",
//!   "confidence": 0.9,
//!   "actions": [{"type": "tap", "elementId": 1}]
//! }
//! ```
//!
//! A single legacy `"action": {...}` object is accepted in place of
//! `actions`, as is the flat shape `{"action": "tap", "elementId": 1, ...}`.
//! The discriminator may be `type`, `gesture` or `action`.
//!
//! An action that names a known kind but fails validation does not reject the
//! whole decision; it becomes [`Action::Invalid`] and fails when executed.

use pilot_core::{Action, ActionKind, Decision, DynamicAction, PilotError, Result};
use serde_json::{Map, Value};
use tracing::debug;

use crate::params::{to_snake_case, Params};
use crate::schema::schema_for;

/// Keys that name the action kind, in priority order
const DISCRIMINATORS: &[&str] = &["type", "gesture", "action", "action_type", "kind"];

/// Top-level decision keys, excluded from flat-shape action parameters
const DECISION_KEYS: &[&str] = &[
    "thought",
    "thinking",
    "reasoning",
    "next_goal",
    "confidence",
    "actions",
    "action",
];

/// Name given to action objects without a discriminator
const UNNAMED: &str = "unnamed";

/// Parse a reasoning reply into a decision
pub fn parse_decision(reply: &str) -> Result<Decision> {
    if reply.trim().is_empty() {
        return Err(PilotError::DecisionParse("empty reply".to_string()));
    }

    let value = extract_json(reply)
        .ok_or_else(|| PilotError::DecisionParse("no JSON object found in reply".to_string()))?;

    let object: Map<String, Value> = match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (to_snake_case(&k), v))
            .collect(),
        _ => {
            return Err(PilotError::DecisionParse(
                "reply is not a JSON object".to_string(),
            ))
        }
    };

    let thought = first_string(&object, &["thought", "thinking", "reasoning"]).unwrap_or_default();
    let next_goal = first_string(&object, &["next_goal"]).unwrap_or_default();
    let confidence = parse_confidence(object.get("confidence"))?;

    let actions: Vec<Action> = match (object.get("actions"), object.get("action")) {
        (Some(Value::Array(items)), _) => items.iter().map(resolve_action).collect(),
        (Some(single @ Value::Object(_)), _) => vec![resolve_action(single)],
        (Some(other), _) => {
            return Err(PilotError::DecisionParse(format!(
                "'actions' must be an array, got {}",
                type_name(other)
            )))
        }
        (None, Some(Value::Array(items))) => items.iter().map(resolve_action).collect(),
        (None, Some(single @ Value::Object(_))) => vec![resolve_action(single)],
        (None, Some(Value::String(name))) => {
            // Flat legacy shape: parameters live next to the decision fields
            let params = Params::from_object(&object, DECISION_KEYS);
            vec![resolve_named(name, params)]
        }
        (None, Some(other)) => {
            return Err(PilotError::DecisionParse(format!(
                "'action' must be an object, got {}",
                type_name(other)
            )))
        }
        (None, None) => {
            return Err(PilotError::DecisionParse(
                "reply has neither 'actions' nor 'action'".to_string(),
            ))
        }
    };

    debug!(
        "Parsed decision with {} action(s): {}",
        actions.len(),
        actions
            .iter()
            .map(Action::name)
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(Decision {
        thought,
        next_goal,
        confidence,
        actions,
    })
}

/// Resolve one action object
///
/// Known kinds are validated against the schema; unknown names become
/// [`Action::Dynamic`] for the fallback interpreter.
pub fn resolve_action(value: &Value) -> Action {
    match value {
        Value::Object(object) => {
            let normalized: Map<String, Value> = object
                .iter()
                .map(|(k, v)| (to_snake_case(k), v.clone()))
                .collect();

            let discriminator = DISCRIMINATORS
                .iter()
                .find_map(|key| normalized.get(*key).map(|value| (*key, value)));

            match discriminator {
                Some((key, Value::String(name))) => {
                    let params = Params::from_object(&normalized, &[key]);
                    resolve_named(name, params)
                }
                Some((key, other)) => Action::Invalid {
                    name: UNNAMED.to_string(),
                    reason: format!("'{}' must be a string, got {}", key, type_name(other)),
                },
                None => Action::Dynamic(DynamicAction {
                    name: UNNAMED.to_string(),
                    params: Params::from_object(&normalized, &[]).into_bag(),
                }),
            }
        }
        // Bare names such as "back"
        Value::String(name) => resolve_named(name, Params::default()),
        other => Action::Invalid {
            name: UNNAMED.to_string(),
            reason: format!("action must be an object, got {}", type_name(other)),
        },
    }
}

fn resolve_named(name: &str, params: Params) -> Action {
    match name.parse::<ActionKind>() {
        Ok(kind) => schema_for(kind)
            .build(&params)
            .unwrap_or_else(|reason| Action::Invalid {
                name: kind.name().to_string(),
                reason,
            }),
        Err(_) => Action::Dynamic(DynamicAction {
            name: name.trim().to_string(),
            params: params.into_bag(),
        }),
    }
}

/// Locate the JSON object in a reply
///
/// Tries, in order: the whole reply, the first fenced block, and the span from
/// the first `{` to the last `}`.
pub fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

/// Content of the first ``` fence, without its language tag
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
}

/// Confidence in [0, 1]; percentages are scaled down, missing means 1.0
fn parse_confidence(value: Option<&Value>) -> Result<f32> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(1.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        Some(_) => None,
    }
    .filter(|raw| raw.is_finite())
    .ok_or_else(|| PilotError::DecisionParse("'confidence' must be a finite number".to_string()))?;

    let scaled = if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    };
    Ok(scaled.clamp(0.0, 1.0) as f32)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

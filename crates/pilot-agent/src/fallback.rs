//! Fallback interpreter for unrecognized action names
//!
//! An ordered table of shape predicates over the parameter bag. The first
//! matching rule names the canonical kind, whose schema then validates and
//! builds the action. No match is a descriptive, non-retryable failure.

use pilot_core::{Action, ActionKind, DynamicAction};
use tracing::debug;

use crate::params::{Params, COORDINATE_KEYS, ELEMENT_KEYS};
use crate::schema::schema_for;

/// One row of the fallback table
#[derive(Debug, Clone, Copy)]
pub struct FallbackRule {
    /// Human description of the shape, used in failure messages
    pub shape: &'static str,
    pub kind: ActionKind,
    pub matches: fn(&Params) -> bool,
}

/// Rules in priority order
pub const FALLBACK_RULES: &[FallbackRule] = &[
    FallbackRule {
        shape: "start + end coordinates",
        kind: ActionKind::Swipe,
        matches: has_start_and_end,
    },
    FallbackRule {
        shape: "coordinates or element id",
        kind: ActionKind::Tap,
        matches: has_single_target,
    },
    FallbackRule {
        shape: "free text (text/content/input/value)",
        kind: ActionKind::Type,
        matches: has_free_text,
    },
    FallbackRule {
        shape: "app name (app/app_name/package)",
        kind: ActionKind::OpenApp,
        matches: has_app_name,
    },
    FallbackRule {
        shape: "direction",
        kind: ActionKind::Scroll,
        matches: has_direction,
    },
];

fn has_start_and_end(p: &Params) -> bool {
    (p.has_point("start") || p.has_point("from")) && (p.has_point("end") || p.has_point("to"))
}

fn has_single_target(p: &Params) -> bool {
    p.has_any(ELEMENT_KEYS)
        || p.has_any(COORDINATE_KEYS)
        || p.has_any(&["target"])
        || (p.has_any(&["x"]) && p.has_any(&["y"]))
}

fn has_free_text(p: &Params) -> bool {
    p.has_any(&["text", "content", "input", "value"])
}

fn has_app_name(p: &Params) -> bool {
    p.has_any(&["app", "app_name", "package"])
}

fn has_direction(p: &Params) -> bool {
    p.has_any(&["direction", "dir"])
}

/// Supported shapes, in priority order
pub fn supported_shapes() -> String {
    FALLBACK_RULES
        .iter()
        .map(|rule| format!("{} => {}", rule.shape, rule.kind))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Interpret a dynamic action by the shape of its parameters
pub fn interpret(action: &DynamicAction) -> Result<Action, String> {
    let params = Params::from_bag(&action.params);

    let rule = FALLBACK_RULES
        .iter()
        .find(|rule| (rule.matches)(&params))
        .ok_or_else(|| {
            format!(
                "Unsupported action '{}' with parameters [{}]. Supported shapes: {}",
                action.name,
                params.keys().collect::<Vec<_>>().join(", "),
                supported_shapes()
            )
        })?;

    debug!(
        "Interpreting unknown action '{}' as {} ({})",
        action.name, rule.kind, rule.shape
    );

    schema_for(rule.kind)
        .build(&params)
        .map_err(|e| format!("'{}' looks like {} but {}", action.name, rule.kind, e))
}

//! Declarative action schema
//!
//! One registry entry per canonical [`ActionKind`]. The same entries render
//! the vocabulary shown to the reasoning service and bind the parameters of
//! its replies, so the two cannot drift apart.

use pilot_core::{Action, ActionKind, Point, ScrollDirection, Target};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::params::{
    value_to_bool, value_to_direction, value_to_i64, value_to_point, value_to_string, Params,
};

/// Parameter value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    /// Element id or coordinates
    Target,
    /// Coordinate pair
    Point,
    Direction,
}

impl ParamType {
    fn label(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Target => "element id or [x, y]",
            Self::Point => "[x, y]",
            Self::Direction => "up|down|left|right",
        }
    }
}

/// One parameter of an action
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
}

const fn required(
    name: &'static str,
    param_type: ParamType,
    aliases: &'static [&'static str],
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        param_type,
        required: true,
        aliases,
        description,
    }
}

const fn optional(
    name: &'static str,
    param_type: ParamType,
    aliases: &'static [&'static str],
    description: &'static str,
) -> ParamSpec {
    ParamSpec {
        name,
        param_type,
        required: false,
        aliases,
        description,
    }
}

/// Schema entry for one action kind
#[derive(Debug, Clone)]
pub struct ActionSchema {
    pub kind: ActionKind,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

/// A bound parameter value
#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Str(String),
    Int(i64),
    Bool(bool),
    Target(Target),
    Point(Point),
    Direction(ScrollDirection),
}

/// Parameters bound against a schema entry
#[derive(Debug, Default)]
struct Bound {
    args: HashMap<&'static str, Arg>,
}

impl Bound {
    fn string(&self, name: &str) -> Option<String> {
        match self.args.get(name) {
            Some(Arg::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.string(name).unwrap_or_else(|| default.to_string())
    }

    fn int_or(&self, name: &str, default: u64) -> u64 {
        match self.args.get(name) {
            Some(Arg::Int(v)) => (*v).max(0) as u64,
            _ => default,
        }
    }

    fn bool_or(&self, name: &str, default: bool) -> bool {
        match self.args.get(name) {
            Some(Arg::Bool(b)) => *b,
            _ => default,
        }
    }

    fn target(&self) -> Option<Target> {
        match self.args.get("target") {
            Some(Arg::Target(t)) => Some(*t),
            _ => None,
        }
    }

    fn point(&self, name: &str) -> Option<Point> {
        match self.args.get(name) {
            Some(Arg::Point(p)) => Some(*p),
            _ => None,
        }
    }

    fn direction(&self) -> ScrollDirection {
        match self.args.get("direction") {
            Some(Arg::Direction(d)) => *d,
            _ => ScrollDirection::default(),
        }
    }
}

impl ActionSchema {
    fn new(kind: ActionKind, description: &'static str, params: Vec<ParamSpec>) -> Self {
        Self {
            kind,
            description,
            params,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Validate `params` and build the action
    ///
    /// Fails closed: a missing required parameter or a value of the wrong
    /// type is an error, never a guess.
    pub fn build(&self, params: &Params) -> Result<Action, String> {
        let bound = self.bind(params)?;
        let missing_target = || format!("{}: missing target", self.name());

        let action = match self.kind {
            ActionKind::Tap => Action::Tap {
                target: bound.target().ok_or_else(missing_target)?,
            },
            ActionKind::DoubleTap => Action::DoubleTap {
                target: bound.target().ok_or_else(missing_target)?,
            },
            ActionKind::LongPress => Action::LongPress {
                target: bound.target().ok_or_else(missing_target)?,
                duration_ms: bound.int_or("duration_ms", 800),
            },
            ActionKind::Type => Action::Type {
                text: bound.string_or("text", ""),
                target: bound.target(),
                clear: bound.bool_or("clear", false),
            },
            ActionKind::ClearText => Action::ClearText {
                target: bound.target(),
            },
            ActionKind::Scroll => Action::Scroll {
                direction: bound.direction(),
                target: bound.target(),
            },
            ActionKind::Swipe | ActionKind::Drag => {
                let start = bound
                    .point("start")
                    .ok_or_else(|| format!("{}: missing start", self.name()))?;
                let end = bound
                    .point("end")
                    .ok_or_else(|| format!("{}: missing end", self.name()))?;
                if self.kind == ActionKind::Swipe {
                    Action::Swipe {
                        start,
                        end,
                        duration_ms: bound.int_or("duration_ms", 300),
                    }
                } else {
                    Action::Drag {
                        start,
                        end,
                        duration_ms: bound.int_or("duration_ms", 600),
                    }
                }
            }
            ActionKind::Wait => Action::Wait {
                duration_ms: bound.int_or("duration_ms", 1000),
            },
            ActionKind::OpenApp => Action::OpenApp {
                app: bound.string_or("app", ""),
            },
            ActionKind::CloseApp => Action::CloseApp {
                app: bound.string_or("app", ""),
            },
            ActionKind::Back => Action::Back,
            ActionKind::Home => Action::Home,
            ActionKind::Recents => Action::Recents,
            ActionKind::Enter => Action::Enter,
            ActionKind::OpenNotifications => Action::OpenNotifications,
            ActionKind::OpenQuickSettings => Action::OpenQuickSettings,
            ActionKind::Screenshot => Action::Screenshot,
            ActionKind::CopyText => Action::CopyText {
                text: bound.string_or("text", ""),
            },
            ActionKind::Paste => Action::Paste {
                target: bound.target(),
            },
            ActionKind::OpenUrl => Action::OpenUrl {
                url: bound.string_or("url", ""),
            },
            ActionKind::ReadFile => Action::ReadFile {
                path: bound.string_or("path", ""),
            },
            ActionKind::WriteFile => Action::WriteFile {
                path: bound.string_or("path", ""),
                content: bound.string_or("content", ""),
            },
            ActionKind::AppendFile => Action::AppendFile {
                path: bound.string_or("path", ""),
                content: bound.string_or("content", ""),
            },
            ActionKind::ListFiles => Action::ListFiles {
                path: bound.string_or("path", "."),
            },
            ActionKind::DeleteFile => Action::DeleteFile {
                path: bound.string_or("path", ""),
            },
            ActionKind::Speak => Action::Speak {
                text: bound.string_or("text", ""),
            },
            ActionKind::AskUser => Action::AskUser {
                question: bound.string_or("question", ""),
            },
            ActionKind::Search => Action::Search {
                query: bound.string_or("query", ""),
            },
            ActionKind::Finish => Action::Finish {
                message: bound.string_or("message", ""),
                success: bound.bool_or("success", true),
            },
        };

        Ok(action)
    }

    fn bind(&self, params: &Params) -> Result<Bound, String> {
        let mut bound = Bound::default();

        for param_spec in &self.params {
            let arg = match param_spec.param_type {
                ParamType::Target => params
                    .target()
                    .map_err(|e| format!("{}: {}", self.name(), e))?
                    .map(Arg::Target),
                ParamType::Point => {
                    let mut found = None;
                    for key in std::iter::once(&param_spec.name).chain(param_spec.aliases.iter()) {
                        if let Some(value) = params.get(key) {
                            found = Some(value_to_point(value).map(Arg::Point).ok_or_else(|| {
                                self.type_error(param_spec, key)
                            })?);
                            break;
                        }
                        if let Some(point) = params.point(key) {
                            found = Some(Arg::Point(point));
                            break;
                        }
                    }
                    found
                }
                _ => match lookup(params, param_spec) {
                    Some((key, value)) => Some(
                        match param_spec.param_type {
                            ParamType::String => value_to_string(value).map(Arg::Str),
                            ParamType::Integer => value_to_i64(value).map(Arg::Int),
                            ParamType::Boolean => value_to_bool(value).map(Arg::Bool),
                            ParamType::Direction => value_to_direction(value).map(Arg::Direction),
                            ParamType::Target | ParamType::Point => None,
                        }
                        .ok_or_else(|| self.type_error(param_spec, key))?,
                    ),
                    None => None,
                },
            };

            match arg {
                Some(arg) => {
                    bound.args.insert(param_spec.name, arg);
                }
                None if param_spec.required => {
                    return Err(format!(
                        "{}: missing required parameter '{}'",
                        self.name(),
                        param_spec.name
                    ));
                }
                None => {}
            }
        }

        Ok(bound)
    }

    fn type_error(&self, param_spec: &ParamSpec, key: &str) -> String {
        format!(
            "{}: parameter '{}' must be {}",
            self.name(),
            key,
            param_spec.param_type.label()
        )
    }

    /// One vocabulary line, e.g. `- tap(target*): Tap an element or point`
    pub fn describe(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}{}", p.name, if p.required { "*" } else { "" }))
            .collect();
        format!(
            "- {}({}): {}",
            self.name(),
            params.join(", "),
            self.description
        )
    }
}

fn lookup<'a>(params: &'a Params, param_spec: &ParamSpec) -> Option<(&'static str, &'a serde_json::Value)> {
    std::iter::once(param_spec.name)
        .chain(param_spec.aliases.iter().copied())
        .find_map(|key| params.get(key).map(|v| (key, v)))
}

const TARGET: ParamSpec = required(
    "target",
    ParamType::Target,
    &[],
    "element id (elementId) or coordinates (x, y)",
);
const OPTIONAL_TARGET: ParamSpec = optional(
    "target",
    ParamType::Target,
    &[],
    "element id (elementId) or coordinates (x, y)",
);

fn build_registry() -> Vec<ActionSchema> {
    use ActionKind::*;
    use ParamType as T;

    vec![
        ActionSchema::new(Tap, "Tap an element or point", vec![TARGET]),
        ActionSchema::new(DoubleTap, "Double tap an element or point", vec![TARGET]),
        ActionSchema::new(
            LongPress,
            "Press and hold an element or point",
            vec![
                TARGET,
                optional("duration_ms", T::Integer, &["duration"], "hold time in ms"),
            ],
        ),
        ActionSchema::new(
            Type,
            "Type text, optionally into a specific field",
            vec![
                required("text", T::String, &["content", "input", "value"], "text to type"),
                OPTIONAL_TARGET,
                optional("clear", T::Boolean, &["clear_first"], "clear the field first"),
            ],
        ),
        ActionSchema::new(ClearText, "Clear a text field", vec![OPTIONAL_TARGET]),
        ActionSchema::new(
            Scroll,
            "Scroll to reveal more content (down shows content below)",
            vec![
                optional("direction", T::Direction, &["dir"], "defaults to down"),
                OPTIONAL_TARGET,
            ],
        ),
        ActionSchema::new(
            Swipe,
            "Swipe between two points",
            vec![
                required("start", T::Point, &["from"], "start point"),
                required("end", T::Point, &["to"], "end point"),
                optional("duration_ms", T::Integer, &["duration"], "gesture time in ms"),
            ],
        ),
        ActionSchema::new(
            Drag,
            "Drag from one point to another",
            vec![
                required("start", T::Point, &["from"], "start point"),
                required("end", T::Point, &["to"], "end point"),
                optional("duration_ms", T::Integer, &["duration"], "gesture time in ms"),
            ],
        ),
        ActionSchema::new(
            Wait,
            "Wait for the screen to settle",
            vec![optional("duration_ms", T::Integer, &["duration", "ms"], "defaults to 1000")],
        ),
        ActionSchema::new(
            OpenApp,
            "Launch an app by name or package",
            vec![required("app", T::String, &["app_name", "package", "name"], "app name")],
        ),
        ActionSchema::new(
            CloseApp,
            "Close an app",
            vec![required("app", T::String, &["app_name", "package", "name"], "app name")],
        ),
        ActionSchema::new(Back, "Press the system back button", vec![]),
        ActionSchema::new(Home, "Go to the home screen", vec![]),
        ActionSchema::new(Recents, "Show recent apps", vec![]),
        ActionSchema::new(Enter, "Press enter / submit", vec![]),
        ActionSchema::new(OpenNotifications, "Open the notification shade", vec![]),
        ActionSchema::new(OpenQuickSettings, "Open quick settings", vec![]),
        ActionSchema::new(Screenshot, "Capture the screen", vec![]),
        ActionSchema::new(
            CopyText,
            "Copy text to the clipboard",
            vec![required("text", T::String, &["content"], "text to copy")],
        ),
        ActionSchema::new(Paste, "Paste the clipboard", vec![OPTIONAL_TARGET]),
        ActionSchema::new(
            OpenUrl,
            "Open a URL in the browser",
            vec![required("url", T::String, &["link"], "absolute URL")],
        ),
        ActionSchema::new(
            ReadFile,
            "Read a file from the agent workspace",
            vec![required("path", T::String, &["file", "filename"], "relative path")],
        ),
        ActionSchema::new(
            WriteFile,
            "Write a file in the agent workspace",
            vec![
                required("path", T::String, &["file", "filename"], "relative path"),
                required("content", T::String, &["text"], "file content"),
            ],
        ),
        ActionSchema::new(
            AppendFile,
            "Append to a file in the agent workspace",
            vec![
                required("path", T::String, &["file", "filename"], "relative path"),
                required("content", T::String, &["text"], "content to append"),
            ],
        ),
        ActionSchema::new(
            ListFiles,
            "List files in the agent workspace",
            vec![optional("path", T::String, &["dir", "directory"], "defaults to .")],
        ),
        ActionSchema::new(
            DeleteFile,
            "Delete a file in the agent workspace",
            vec![required("path", T::String, &["file", "filename"], "relative path")],
        ),
        ActionSchema::new(
            Speak,
            "Say something to the user",
            vec![required("text", T::String, &["message"], "what to say")],
        ),
        ActionSchema::new(
            AskUser,
            "Ask the user a question",
            vec![required("question", T::String, &["text", "message"], "the question")],
        ),
        ActionSchema::new(
            Search,
            "Run a web search",
            vec![required("query", T::String, &["text", "q"], "search terms")],
        ),
        ActionSchema::new(
            Finish,
            "Finish the task",
            vec![
                optional("message", T::String, &["text", "summary", "reason"], "summary"),
                optional("success", T::Boolean, &[], "defaults to true"),
            ],
        ),
    ]
}

static REGISTRY: OnceLock<Vec<ActionSchema>> = OnceLock::new();

/// Every schema entry, in vocabulary order
pub fn registry() -> &'static [ActionSchema] {
    REGISTRY.get_or_init(build_registry)
}

/// Schema entry for `kind`
pub fn schema_for(kind: ActionKind) -> &'static ActionSchema {
    // Registry order matches ActionKind::ALL
    let index = ActionKind::ALL
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_default();
    &registry()[index]
}

/// Vocabulary text for the reasoning service
///
/// Required parameters are marked with `*`.
pub fn vocabulary() -> String {
    let mut text = String::from("Available actions (required parameters marked *):\n");
    for schema in registry() {
        let _ = writeln!(text, "{}", schema.describe());
    }
    text
}

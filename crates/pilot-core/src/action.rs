//! Action model
//!
//! Canonical actions form a closed sum type. Two extra variants cover what the
//! closed set cannot: [`Action::Dynamic`] carries an action name the schema does
//! not know (resolved later by shape), and [`Action::Invalid`] carries a known
//! action whose parameters failed validation. Invalid actions never reach the
//! actuator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Bounds;

/// A point in surface coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// What an element-directed action points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Element id from the snapshot the decision was made on
    Element(u32),
    /// Absolute coordinates
    Point(Point),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Element(id) => write!(f, "element {}", id),
            Self::Point(p) => write!(f, "{}", p),
        }
    }
}

/// Scroll direction, named after the content that becomes visible
///
/// `Down` reveals content below the current viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Finger path (start, end) for a swipe that scrolls in this direction
    /// inside `bounds`.
    ///
    /// Scrolling down drags the content upward, so the finger travels from the
    /// lower quarter of the bounds to the upper quarter. The other directions
    /// mirror that.
    pub fn swipe_within(&self, bounds: &Bounds) -> (Point, Point) {
        let center = bounds.center();
        let near_top = bounds.top + bounds.height() / 4;
        let near_bottom = bounds.top + bounds.height() * 3 / 4;
        let near_left = bounds.left + bounds.width() / 4;
        let near_right = bounds.left + bounds.width() * 3 / 4;

        match self {
            Self::Down => (Point::new(center.x, near_bottom), Point::new(center.x, near_top)),
            Self::Up => (Point::new(center.x, near_top), Point::new(center.x, near_bottom)),
            Self::Right => (Point::new(near_right, center.y), Point::new(near_left, center.y)),
            Self::Left => (Point::new(near_left, center.y), Point::new(near_right, center.y)),
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

impl std::fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Left => write!(f, "left"),
            Self::Right => write!(f, "right"),
        }
    }
}

impl std::str::FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" | "u" => Ok(Self::Up),
            "down" | "d" => Ok(Self::Down),
            "left" | "l" => Ok(Self::Left),
            "right" | "r" => Ok(Self::Right),
            _ => Err(format!("Invalid scroll direction: {}", s)),
        }
    }
}

/// Canonical action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Tap,
    DoubleTap,
    LongPress,
    Type,
    ClearText,
    Scroll,
    Swipe,
    Drag,
    Wait,
    OpenApp,
    CloseApp,
    Back,
    Home,
    Recents,
    Enter,
    OpenNotifications,
    OpenQuickSettings,
    Screenshot,
    CopyText,
    Paste,
    OpenUrl,
    ReadFile,
    WriteFile,
    AppendFile,
    ListFiles,
    DeleteFile,
    Speak,
    AskUser,
    Search,
    Finish,
}

impl ActionKind {
    /// Every canonical kind, in vocabulary order
    pub const ALL: [ActionKind; 30] = [
        Self::Tap,
        Self::DoubleTap,
        Self::LongPress,
        Self::Type,
        Self::ClearText,
        Self::Scroll,
        Self::Swipe,
        Self::Drag,
        Self::Wait,
        Self::OpenApp,
        Self::CloseApp,
        Self::Back,
        Self::Home,
        Self::Recents,
        Self::Enter,
        Self::OpenNotifications,
        Self::OpenQuickSettings,
        Self::Screenshot,
        Self::CopyText,
        Self::Paste,
        Self::OpenUrl,
        Self::ReadFile,
        Self::WriteFile,
        Self::AppendFile,
        Self::ListFiles,
        Self::DeleteFile,
        Self::Speak,
        Self::AskUser,
        Self::Search,
        Self::Finish,
    ];

    /// Wire name (snake_case)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::DoubleTap => "double_tap",
            Self::LongPress => "long_press",
            Self::Type => "type",
            Self::ClearText => "clear_text",
            Self::Scroll => "scroll",
            Self::Swipe => "swipe",
            Self::Drag => "drag",
            Self::Wait => "wait",
            Self::OpenApp => "open_app",
            Self::CloseApp => "close_app",
            Self::Back => "back",
            Self::Home => "home",
            Self::Recents => "recents",
            Self::Enter => "enter",
            Self::OpenNotifications => "open_notifications",
            Self::OpenQuickSettings => "open_quick_settings",
            Self::Screenshot => "screenshot",
            Self::CopyText => "copy_text",
            Self::Paste => "paste",
            Self::OpenUrl => "open_url",
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::AppendFile => "append_file",
            Self::ListFiles => "list_files",
            Self::DeleteFile => "delete_file",
            Self::Speak => "speak",
            Self::AskUser => "ask_user",
            Self::Search => "search",
            Self::Finish => "finish",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    /// Accepts snake_case, camelCase, kebab-case and a few common synonyms
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .flat_map(char::to_lowercase)
            .collect();

        let kind = match normalized.as_str() {
            "tap" | "click" => Self::Tap,
            "doubletap" | "doubleclick" => Self::DoubleTap,
            "longpress" | "longclick" => Self::LongPress,
            "type" | "input" | "typetext" | "inputtext" => Self::Type,
            "cleartext" | "clear" => Self::ClearText,
            "scroll" => Self::Scroll,
            "swipe" => Self::Swipe,
            "drag" => Self::Drag,
            "wait" | "sleep" => Self::Wait,
            "openapp" | "launch" | "launchapp" => Self::OpenApp,
            "closeapp" => Self::CloseApp,
            "back" | "goback" => Self::Back,
            "home" | "gohome" => Self::Home,
            "recents" | "recentapps" => Self::Recents,
            "enter" | "pressenter" => Self::Enter,
            "opennotifications" => Self::OpenNotifications,
            "openquicksettings" => Self::OpenQuickSettings,
            "screenshot" | "takescreenshot" => Self::Screenshot,
            "copytext" | "copy" => Self::CopyText,
            "paste" => Self::Paste,
            "openurl" => Self::OpenUrl,
            "readfile" => Self::ReadFile,
            "writefile" => Self::WriteFile,
            "appendfile" => Self::AppendFile,
            "listfiles" => Self::ListFiles,
            "deletefile" => Self::DeleteFile,
            "speak" | "say" => Self::Speak,
            "askuser" => Self::AskUser,
            "search" => Self::Search,
            "finish" | "done" | "complete" => Self::Finish,
            _ => return Err(format!("Unknown action kind: {}", s)),
        };
        Ok(kind)
    }
}

/// An action name outside the canonical set, with its raw parameter bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicAction {
    pub name: String,
    pub params: BTreeMap<String, serde_json::Value>,
}

/// A command for the actuation boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Tap { target: Target },
    DoubleTap { target: Target },
    LongPress { target: Target, duration_ms: u64 },
    Type { text: String, target: Option<Target>, clear: bool },
    ClearText { target: Option<Target> },
    Scroll { direction: ScrollDirection, target: Option<Target> },
    Swipe { start: Point, end: Point, duration_ms: u64 },
    Drag { start: Point, end: Point, duration_ms: u64 },
    Wait { duration_ms: u64 },
    OpenApp { app: String },
    CloseApp { app: String },
    Back,
    Home,
    Recents,
    Enter,
    OpenNotifications,
    OpenQuickSettings,
    Screenshot,
    CopyText { text: String },
    Paste { target: Option<Target> },
    OpenUrl { url: String },
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    AppendFile { path: String, content: String },
    ListFiles { path: String },
    DeleteFile { path: String },
    Speak { text: String },
    AskUser { question: String },
    Search { query: String },
    Finish { message: String, success: bool },
    /// Unknown action name, resolved by parameter shape before execution
    Dynamic(DynamicAction),
    /// Known action whose parameters failed validation
    Invalid { name: String, reason: String },
}

impl Action {
    /// Canonical kind, `None` for dynamic and invalid actions
    pub fn kind(&self) -> Option<ActionKind> {
        let kind = match self {
            Self::Tap { .. } => ActionKind::Tap,
            Self::DoubleTap { .. } => ActionKind::DoubleTap,
            Self::LongPress { .. } => ActionKind::LongPress,
            Self::Type { .. } => ActionKind::Type,
            Self::ClearText { .. } => ActionKind::ClearText,
            Self::Scroll { .. } => ActionKind::Scroll,
            Self::Swipe { .. } => ActionKind::Swipe,
            Self::Drag { .. } => ActionKind::Drag,
            Self::Wait { .. } => ActionKind::Wait,
            Self::OpenApp { .. } => ActionKind::OpenApp,
            Self::CloseApp { .. } => ActionKind::CloseApp,
            Self::Back => ActionKind::Back,
            Self::Home => ActionKind::Home,
            Self::Recents => ActionKind::Recents,
            Self::Enter => ActionKind::Enter,
            Self::OpenNotifications => ActionKind::OpenNotifications,
            Self::OpenQuickSettings => ActionKind::OpenQuickSettings,
            Self::Screenshot => ActionKind::Screenshot,
            Self::CopyText { .. } => ActionKind::CopyText,
            Self::Paste { .. } => ActionKind::Paste,
            Self::OpenUrl { .. } => ActionKind::OpenUrl,
            Self::ReadFile { .. } => ActionKind::ReadFile,
            Self::WriteFile { .. } => ActionKind::WriteFile,
            Self::AppendFile { .. } => ActionKind::AppendFile,
            Self::ListFiles { .. } => ActionKind::ListFiles,
            Self::DeleteFile { .. } => ActionKind::DeleteFile,
            Self::Speak { .. } => ActionKind::Speak,
            Self::AskUser { .. } => ActionKind::AskUser,
            Self::Search { .. } => ActionKind::Search,
            Self::Finish { .. } => ActionKind::Finish,
            Self::Dynamic(_) | Self::Invalid { .. } => return None,
        };
        Some(kind)
    }

    /// Name used in logs, error signatures and history
    pub fn name(&self) -> &str {
        match self {
            Self::Dynamic(dynamic) => &dynamic.name,
            Self::Invalid { name, .. } => name,
            other => other.kind().map(|k| k.name()).unwrap_or("unknown"),
        }
    }

    /// Element-or-point target, if the action has one
    pub fn target(&self) -> Option<Target> {
        match self {
            Self::Tap { target } | Self::DoubleTap { target } | Self::LongPress { target, .. } => {
                Some(*target)
            }
            Self::Type { target, .. }
            | Self::ClearText { target }
            | Self::Scroll { target, .. }
            | Self::Paste { target } => *target,
            _ => None,
        }
    }

    /// Copy of this action with its target replaced
    ///
    /// Actions without a target slot are returned unchanged.
    pub fn with_target(&self, new_target: Target) -> Action {
        let mut action = self.clone();
        match &mut action {
            Self::Tap { target } | Self::DoubleTap { target } | Self::LongPress { target, .. } => {
                *target = new_target
            }
            Self::Type { target, .. }
            | Self::ClearText { target }
            | Self::Scroll { target, .. }
            | Self::Paste { target } => *target = Some(new_target),
            _ => {}
        }
        action
    }

    /// Whether executing this action is expected to change the surface
    pub fn changes_surface(&self) -> bool {
        !matches!(
            self,
            Self::Wait { .. }
                | Self::Screenshot
                | Self::CopyText { .. }
                | Self::ReadFile { .. }
                | Self::ListFiles { .. }
                | Self::Speak { .. }
                | Self::AskUser { .. }
                | Self::Finish { .. }
                | Self::Invalid { .. }
        )
    }

    /// One-line human description
    pub fn describe(&self) -> String {
        match self {
            Self::Tap { target } => format!("tap {}", target),
            Self::DoubleTap { target } => format!("double tap {}", target),
            Self::LongPress {
                target,
                duration_ms,
            } => format!("long press {} for {}ms", target, duration_ms),
            Self::Type { text, target, .. } => match target {
                Some(t) => format!("type {:?} into {}", text, t),
                None => format!("type {:?}", text),
            },
            Self::Scroll { direction, .. } => format!("scroll {}", direction),
            Self::Swipe { start, end, .. } => format!("swipe {} -> {}", start, end),
            Self::Drag { start, end, .. } => format!("drag {} -> {}", start, end),
            Self::Wait { duration_ms } => format!("wait {}ms", duration_ms),
            Self::OpenApp { app } => format!("open app {}", app),
            Self::CloseApp { app } => format!("close app {}", app),
            Self::OpenUrl { url } => format!("open url {}", url),
            Self::Search { query } => format!("search {:?}", query),
            Self::Finish { message, success } => {
                format!("finish (success: {}): {}", success, message)
            }
            Self::Dynamic(dynamic) => format!("{} {:?}", dynamic.name, dynamic.params),
            Self::Invalid { name, reason } => format!("invalid {}: {}", name, reason),
            other => other.name().to_string(),
        }
    }
}

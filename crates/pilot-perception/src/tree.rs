//! Raw surface tree and the default tree-to-snapshot parser

use pilot_core::{Bounds, Element, ScrollHints, Snapshot};
use serde::{Deserialize, Serialize};

/// One node of the raw surface tree, as read from the perception source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurfaceNode {
    /// Stable node identity (resource id, accessibility id, ...)
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub text: String,
    /// Accessibility label / content description
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub bounds: Bounds,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub editable: bool,
    #[serde(default)]
    pub scrollable: bool,
    /// Owning app or window, usually set on the root only
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub children: Vec<SurfaceNode>,
}

fn default_enabled() -> bool {
    true
}

impl SurfaceNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            text: String::new(),
            label: String::new(),
            bounds: Bounds::default(),
            enabled: true,
            checked: false,
            clickable: false,
            editable: false,
            scrollable: false,
            package: None,
            children: Vec::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn clickable(mut self) -> Self {
        self.clickable = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    pub fn scrollable(mut self) -> Self {
        self.scrollable = true;
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_child(mut self, child: SurfaceNode) -> Self {
        self.children.push(child);
        self
    }

    /// Text shown for this node: visible text, else its label
    pub fn display_text(&self) -> &str {
        if self.text.is_empty() {
            &self.label
        } else {
            &self.text
        }
    }

    fn is_interesting(&self) -> bool {
        let actionable = self.clickable || self.editable || self.scrollable;
        let labelled = !self.display_text().trim().is_empty();
        (actionable || labelled) && !self.bounds.is_empty()
    }

    /// Total number of nodes in this subtree
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(SurfaceNode::node_count).sum::<usize>()
    }
}

/// Parse a tree into a snapshot, keeping at most `max_elements` elements
///
/// Elements are interactive or labelled nodes with non-empty bounds, numbered
/// from 1 in depth-first order. The caller fills in the fingerprint.
pub fn parse_tree(root: &SurfaceNode, max_elements: usize) -> Snapshot {
    let mut elements = Vec::new();
    let mut hints = ScrollHints::default();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if elements.len() >= max_elements {
            break;
        }

        if node.scrollable {
            hints.up = true;
            hints.down = true;
        }

        if node.is_interesting() {
            elements.push(Element {
                id: elements.len() as u32 + 1,
                bounds: node.bounds,
                label: node.display_text().trim().to_string(),
                element_type: element_type(node),
            });
        }

        // Reverse so the leftmost child is visited first
        stack.extend(node.children.iter().rev());
    }

    let surface_name = root
        .package
        .clone()
        .unwrap_or_else(|| root.display_text().to_string());

    let description = describe(&surface_name, &elements);

    Snapshot {
        elements,
        description,
        surface_name,
        scroll_hints: hints,
        width: root.bounds.width(),
        height: root.bounds.height(),
        fingerprint: String::new(),
    }
}

fn element_type(node: &SurfaceNode) -> String {
    if !node.node_type.is_empty() {
        node.node_type.clone()
    } else if node.editable {
        "input".to_string()
    } else if node.scrollable {
        "list".to_string()
    } else if node.clickable {
        "button".to_string()
    } else {
        "text".to_string()
    }
}

fn describe(surface_name: &str, elements: &[Element]) -> String {
    let mut description = format!("{} elements on {}", elements.len(), surface_name);
    for element in elements {
        description.push_str(&format!(
            "\n[{}] {} \"{}\" {}",
            element.id, element.element_type, element.label, element.bounds
        ));
    }
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_screen() -> SurfaceNode {
        SurfaceNode::new("root", "frame")
            .with_package("com.example.app")
            .with_bounds(Bounds::new(0, 0, 1080, 2400))
            .with_child(
                SurfaceNode::new("title", "text")
                    .with_text("Welcome")
                    .with_bounds(Bounds::new(0, 100, 1080, 200)),
            )
            .with_child(
                SurfaceNode::new("decoration", "view").with_bounds(Bounds::new(0, 200, 1080, 300)),
            )
            .with_child(
                SurfaceNode::new("login", "button")
                    .with_text("Login")
                    .with_bounds(Bounds::new(400, 1000, 680, 1100))
                    .clickable(),
            )
    }

    #[test]
    fn test_parse_keeps_labelled_and_actionable_nodes() {
        let snapshot = parse_tree(&login_screen(), 100);
        assert_eq!(snapshot.elements.len(), 2);
        assert_eq!(snapshot.elements[0].id, 1);
        assert_eq!(snapshot.elements[0].label, "Welcome");
        assert_eq!(snapshot.elements[1].id, 2);
        assert_eq!(snapshot.elements[1].label, "Login");
        assert_eq!(snapshot.surface_name, "com.example.app");
        assert_eq!((snapshot.width, snapshot.height), (1080, 2400));
        assert!(snapshot.description.contains("\"Login\""));
    }

    #[test]
    fn test_parse_respects_element_limit() {
        let mut root = SurfaceNode::new("root", "list")
            .with_bounds(Bounds::new(0, 0, 100, 10_000))
            .scrollable();
        for i in 0..50 {
            root = root.with_child(
                SurfaceNode::new(format!("row{}", i), "row")
                    .with_text(format!("Row {}", i))
                    .with_bounds(Bounds::new(0, i * 100, 100, i * 100 + 100)),
            );
        }

        let snapshot = parse_tree(&root, 10);
        assert_eq!(snapshot.elements.len(), 10);
        assert!(snapshot.scroll_hints.down);
    }

    #[test]
    fn test_node_json_defaults() {
        let node: SurfaceNode =
            serde_json::from_str(r#"{"id":"a","type":"button","text":"OK"}"#).unwrap();
        assert!(node.enabled);
        assert!(!node.clickable);
        assert!(node.children.is_empty());
        assert_eq!(node.node_count(), 1);
    }
}

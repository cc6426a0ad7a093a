//! Expandable tree view over arbitrary JSON values.
//!
//! A tree is built fresh from a value by [`render`]; every composite node
//! owns its `expanded` flag, so toggling one node never affects siblings
//! or ancestors, and re-rendering discards all toggles.

use serde_json::{Number, Value};

use crate::store::{document_id, Document};

/// Composite nodes at a depth below this start expanded.
pub const DEFAULT_EXPANDED_DEPTH: usize = 2;
pub const NULL_MARKER: &str = "null";
pub const EMPTY_OBJECT_MARKER: &str = "{}";

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(usize),
    Object(usize),
}

impl NodeKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => Self::Number(number.clone()),
            Value::String(text) => Self::String(text.clone()),
            Value::Array(items) => Self::Array(items.len()),
            Value::Object(fields) => Self::Object(fields.len()),
        }
    }

    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_)
        )
    }

    /// Only arrays and non-empty objects carry an expand control.
    #[must_use]
    pub fn is_expandable(&self) -> bool {
        match self {
            Self::Array(_) => true,
            Self::Object(len) => *len > 0,
            _ => false,
        }
    }

    /// Text shown for the value. Scalars use their JSON literal form, so
    /// the text parses back to the same value.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Null => NULL_MARKER.to_string(),
            Self::Bool(flag) => flag.to_string(),
            Self::Number(number) => number.to_string(),
            Self::String(text) => Value::String(text.clone()).to_string(),
            Self::Array(len) => format!("Array ({len})"),
            Self::Object(0) => EMPTY_OBJECT_MARKER.to_string(),
            Self::Object(len) => format!("Object ({len})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Field name, or `[i]` for array elements. `None` for a root.
    pub label: Option<String>,
    pub kind: NodeKind,
    pub depth: usize,
    pub expanded: bool,
    pub children: Vec<TreeNode>,
}

/// Builds the display tree for `value` with default expansion.
#[must_use]
pub fn render(value: &Value, depth: usize, field_name: Option<&str>) -> TreeNode {
    let kind = NodeKind::of(value);
    let children = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| render(item, depth + 1, Some(format!("[{index}]").as_str())))
            .collect(),
        Value::Object(fields) => fields
            .iter()
            .map(|(key, field)| render(field, depth + 1, Some(key.as_str())))
            .collect(),
        _ => Vec::new(),
    };
    TreeNode {
        label: field_name.map(str::to_string),
        expanded: kind.is_expandable() && depth < DEFAULT_EXPANDED_DEPTH,
        kind,
        depth,
        children,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow<'a> {
    pub node: &'a TreeNode,
    pub depth: usize,
    /// Child indices from the tree root to `node`.
    pub path: Vec<usize>,
}

impl TreeNode {
    #[must_use]
    pub fn is_expandable(&self) -> bool {
        self.kind.is_expandable()
    }

    #[must_use]
    pub fn marker(&self) -> &'static str {
        match (self.is_expandable(), self.expanded) {
            (false, _) => " ",
            (true, true) => "▾",
            (true, false) => "▸",
        }
    }

    /// One display line: marker, optional label, summary.
    #[must_use]
    pub fn line(&self) -> String {
        match &self.label {
            Some(label) => format!("{} {label}: {}", self.marker(), self.kind.summary()),
            None => format!("{} {}", self.marker(), self.kind.summary()),
        }
    }

    #[must_use]
    pub fn node_at(&self, path: &[usize]) -> Option<&TreeNode> {
        path.iter()
            .try_fold(self, |node, index| node.children.get(*index))
    }

    pub fn node_at_mut(&mut self, path: &[usize]) -> Option<&mut TreeNode> {
        let mut node = self;
        for index in path {
            node = node.children.get_mut(*index)?;
        }
        Some(node)
    }

    /// Flips the node at `path`. Returns false for missing or
    /// non-expandable nodes.
    pub fn toggle_at(&mut self, path: &[usize]) -> bool {
        match self.node_at_mut(path) {
            Some(node) if node.is_expandable() => {
                node.expanded = !node.expanded;
                true
            }
            _ => false,
        }
    }

    pub fn expand_all(&mut self) {
        self.set_all(true);
    }

    pub fn collapse_all(&mut self) {
        self.set_all(false);
    }

    fn set_all(&mut self, expanded: bool) {
        if self.is_expandable() {
            self.expanded = expanded;
        }
        for child in &mut self.children {
            child.set_all(expanded);
        }
    }

    /// Rows for this node and every descendant reachable through expanded
    /// nodes, in display order.
    #[must_use]
    pub fn flatten_visible(&self) -> Vec<FlatRow<'_>> {
        let mut rows = Vec::new();
        self.push_visible(0, &mut Vec::new(), &mut rows);
        rows
    }

    fn push_visible<'a>(&'a self, depth: usize, path: &mut Vec<usize>, rows: &mut Vec<FlatRow<'a>>) {
        rows.push(FlatRow {
            node: self,
            depth,
            path: path.clone(),
        });
        if self.expanded {
            for (index, child) in self.children.iter().enumerate() {
                path.push(index);
                child.push_visible(depth + 1, path, rows);
                path.pop();
            }
        }
    }

    /// Every scalar node regardless of expansion.
    #[must_use]
    pub fn scalar_leaves(&self) -> Vec<&TreeNode> {
        if self.kind.is_scalar() {
            return vec![self];
        }
        self.children
            .iter()
            .flat_map(TreeNode::scalar_leaves)
            .collect()
    }
}

/// One document in a result list: a header plus its tree. Only the
/// first card of a list starts expanded.
#[derive(Debug, Clone)]
pub struct DocumentCard {
    pub index: usize,
    pub id: Option<String>,
    pub expanded: bool,
    pub tree: TreeNode,
    document: Document,
}

impl DocumentCard {
    #[must_use]
    pub fn new(index: usize, document: Document) -> Self {
        Self {
            index,
            id: document_id(&document),
            expanded: index == 0,
            tree: render(&document, 0, None),
            document,
        }
    }

    /// The full document the card was built from.
    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    #[must_use]
    pub fn title(&self) -> String {
        match &self.id {
            Some(id) => format!("#{} {id}", self.index + 1),
            None => format!("#{}", self.index + 1),
        }
    }

    pub fn toggle(&mut self) {
        self.expanded = !self.expanded;
    }

    /// Body rows. A non-empty object root is elided and its fields are
    /// listed directly.
    #[must_use]
    pub fn rows(&self) -> Vec<FlatRow<'_>> {
        if !self.expanded {
            return Vec::new();
        }
        if !matches!(self.tree.kind, NodeKind::Object(len) if len > 0) {
            return self.tree.flatten_visible();
        }
        let mut rows = Vec::new();
        for (index, child) in self.tree.children.iter().enumerate() {
            child.push_visible(0, &mut vec![index], &mut rows);
        }
        rows
    }

    /// Header plus body rows.
    #[must_use]
    pub fn height(&self) -> usize {
        1 + self.rows().len()
    }

    /// Discards all toggles by rebuilding from the stored document.
    pub fn reset(&mut self) {
        self.tree = render(&self.document, 0, None);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{render, DocumentCard, NodeKind, NULL_MARKER};

    fn count_scalars(value: &Value) -> usize {
        match value {
            Value::Array(items) => items.iter().map(count_scalars).sum(),
            Value::Object(fields) => fields.values().map(count_scalars).sum(),
            _ => 1,
        }
    }

    fn sample() -> Value {
        json!({
            "name": "deck",
            "tags": ["a", "b", null],
            "owner": {"id": 7, "address": {"city": "Oslo", "zip": "0150"}},
            "empty": {},
            "none": [],
            "flag": false,
        })
    }

    #[test]
    fn fully_expanded_tree_visits_each_scalar_once() {
        let value = sample();
        let mut tree = render(&value, 0, None);
        tree.expand_all();

        let rows = tree.flatten_visible();
        let scalars = rows
            .iter()
            .filter(|row| row.node.kind.is_scalar())
            .count();
        assert_eq!(scalars, count_scalars(&value));
        assert_eq!(tree.scalar_leaves().len(), count_scalars(&value));
    }

    #[test]
    fn default_expansion_follows_depth() {
        let tree = render(&sample(), 0, None);
        assert!(tree.expanded);

        let owner = tree
            .children
            .iter()
            .find(|child| child.label.as_deref() == Some("owner"))
            .expect("owner field");
        assert_eq!(owner.depth, 1);
        assert!(owner.expanded);

        let address = owner
            .children
            .iter()
            .find(|child| child.label.as_deref() == Some("address"))
            .expect("address field");
        assert_eq!(address.depth, 2);
        assert!(!address.expanded);
    }

    #[test]
    fn toggles_are_local_to_one_node() {
        let value = json!({"a": {"x": 1}, "b": {"y": 2}});
        let mut tree = render(&value, 0, None);

        assert!(tree.toggle_at(&[0]));
        assert!(!tree.children[0].expanded);
        assert!(tree.children[1].expanded);
        assert!(tree.expanded);

        assert!(!tree.toggle_at(&[0, 0]), "scalars have no expand control");
        assert!(!tree.toggle_at(&[9]));
    }

    #[test]
    fn rerender_discards_toggled_state() {
        let value = sample();
        let mut tree = render(&value, 0, None);
        tree.collapse_all();
        assert!(!tree.expanded);

        let fresh = render(&value, 0, None);
        assert!(fresh.expanded);
        assert_eq!(fresh, render(&value, 0, None));
    }

    #[test]
    fn null_is_distinct_from_falsy_scalars() {
        let summaries = [json!(null), json!(""), json!(0), json!(false), json!("null")]
            .iter()
            .map(|value| render(value, 0, None).kind.summary())
            .collect::<Vec<_>>();

        assert_eq!(summaries, vec![NULL_MARKER, "\"\"", "0", "false", "\"null\""]);
    }

    #[test]
    fn scalar_text_parses_back_to_the_value() {
        for value in [
            json!("line\nbreak \"quoted\""),
            json!(-12.5),
            json!(9_007_199_254_740_993_u64),
            json!(true),
            json!(null),
        ] {
            let text = render(&value, 0, None).kind.summary();
            let parsed: Value = serde_json::from_str(&text).expect("summary should parse");
            assert_eq!(parsed, value);
        }
    }

    #[test]
    fn composite_summaries_and_array_labels() {
        let tree = render(&json!({"list": [1, 2], "empty": {}}), 0, None);
        let field = |name: &str| {
            tree.children
                .iter()
                .find(|child| child.label.as_deref() == Some(name))
                .expect("field should render")
        };
        let empty = field("empty");
        let list = field("list");

        assert_eq!(empty.kind, NodeKind::Object(0));
        assert_eq!(empty.kind.summary(), "{}");
        assert!(!empty.is_expandable());
        assert_eq!(list.kind.summary(), "Array (2)");
        assert_eq!(list.children[1].label.as_deref(), Some("[1]"));
        assert_eq!(tree.kind.summary(), "Object (2)");
        assert_eq!(list.line(), "▾ list: Array (2)");
    }

    #[test]
    fn fields_keep_the_order_they_were_stored_in() {
        let value: Value =
            serde_json::from_str(r#"{"zeta": 1, "_id": "a1", "alpha": 2}"#).expect("valid JSON");
        let labels = render(&value, 0, None)
            .children
            .iter()
            .map(|child| child.label.clone().unwrap_or_default())
            .collect::<Vec<_>>();

        assert_eq!(labels, vec!["zeta", "_id", "alpha"]);
    }

    #[test]
    fn only_the_first_card_starts_expanded() {
        let first = DocumentCard::new(0, json!({"_id": "a1", "n": 1}));
        let second = DocumentCard::new(1, json!({"_id": "a2", "n": 2}));

        assert!(first.expanded);
        assert!(!second.expanded);
        assert_eq!(first.title(), "#1 a1");
        assert!(second.rows().is_empty());
        assert_eq!(second.height(), 1);
    }

    #[test]
    fn card_lists_root_fields_directly_with_root_relative_paths() {
        let mut card = DocumentCard::new(0, json!({"_id": "a1", "meta": {"k": {"deep": 1}}}));

        let labels = card
            .rows()
            .iter()
            .map(|row| (row.node.label.clone(), row.depth, row.path.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![
                (Some("_id".to_string()), 0, vec![0]),
                (Some("meta".to_string()), 0, vec![1]),
                (Some("k".to_string()), 1, vec![1, 0]),
            ]
        );

        assert!(card.tree.toggle_at(&[1, 0]));
        assert_eq!(card.rows().len(), 4);
        card.reset();
        assert_eq!(card.rows().len(), 3);
    }
}

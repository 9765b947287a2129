use std::collections::HashMap;

use ratatui::style::Color;
use sqlnav_core::config::StateStore;
use sqlnav_core::driver::Driver;
use sqlnav_core::node::{NodeKey, TreeNode};
use sqlnav_core::tree::TreeSupplier;

/// One visible row of the flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TreeLine {
    pub depth: usize,
    pub marker: &'static str,
    pub icon: &'static str,
    pub color: Color,
    pub label: String,
    pub description: Option<String>,
}

pub(crate) fn node_icon<D: Driver>(node: &TreeNode<D>) -> (&'static str, Color) {
    match node {
        TreeNode::Connection { connected: true, .. } => ("●", Color::Green),
        TreeNode::Connection { .. } => ("○", Color::Red),
        TreeNode::Database { .. } => ("▤", Color::Yellow),
        TreeNode::Table { .. } => ("▦", Color::Cyan),
        TreeNode::Error { .. } => ("✖", Color::Red),
        TreeNode::Loading => ("…", Color::DarkGray),
    }
}

pub(crate) fn node_description<D: Driver>(node: &TreeNode<D>) -> Option<String> {
    match node {
        TreeNode::Connection {
            connected: true,
            address,
            ..
        } => Some(address.clone()),
        TreeNode::Connection { .. } => Some("Click to connect".to_string()),
        TreeNode::Error { .. } => Some("Click to retry".to_string()),
        _ => None,
    }
}

/// Expanded state lives here: a node is expanded exactly when its children
/// are cached.
pub(crate) struct TreeView<D: Driver> {
    roots: Vec<TreeNode<D>>,
    children: HashMap<NodeKey, Vec<TreeNode<D>>>,
    selected: usize,
}

impl<D: Driver> Default for TreeView<D> {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            children: HashMap::new(),
            selected: 0,
        }
    }
}

impl<D: Driver> TreeView<D> {
    fn visible(&self) -> Vec<(usize, &TreeNode<D>)> {
        let mut rows = Vec::new();
        for root in &self.roots {
            self.push_visible(root, 0, &mut rows);
        }
        rows
    }

    fn push_visible<'a>(
        &'a self,
        node: &'a TreeNode<D>,
        depth: usize,
        rows: &mut Vec<(usize, &'a TreeNode<D>)>,
    ) {
        rows.push((depth, node));
        if let Some(children) = self.children.get(&node.key()) {
            for child in children {
                self.push_visible(child, depth + 1, rows);
            }
        }
    }

    pub(crate) fn lines(&self) -> Vec<TreeLine> {
        self.visible()
            .into_iter()
            .map(|(depth, node)| {
                let (icon, color) = node_icon(node);
                let marker = if !node.is_expandable() {
                    " "
                } else if self.is_expanded(&node.key()) {
                    "▾"
                } else {
                    "▸"
                };
                TreeLine {
                    depth,
                    marker,
                    icon,
                    color,
                    label: node.label().to_string(),
                    description: node_description(node),
                }
            })
            .collect()
    }

    #[must_use]
    pub(crate) fn selected(&self) -> usize {
        self.selected
    }

    pub(crate) fn selected_node(&self) -> Option<TreeNode<D>> {
        self.visible()
            .get(self.selected)
            .map(|(_, node)| (*node).clone())
    }

    pub(crate) fn is_expanded(&self, key: &NodeKey) -> bool {
        self.children.contains_key(key)
    }

    pub(crate) fn move_selection(&mut self, delta: isize) {
        let len = self.visible().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        self.selected = self.selected.saturating_add_signed(delta).min(len - 1);
    }

    pub(crate) fn select_key(&mut self, key: Option<&NodeKey>) {
        let visible = self.visible();
        if let Some(index) =
            key.and_then(|key| visible.iter().position(|(_, node)| &node.key() == key))
        {
            self.selected = index;
        } else {
            self.selected = self.selected.min(visible.len().saturating_sub(1));
        }
    }

    fn find(&self, key: &NodeKey) -> Option<TreeNode<D>> {
        self.roots
            .iter()
            .chain(self.children.values().flatten())
            .find(|node| &node.key() == key)
            .cloned()
    }

    pub(crate) async fn reload_roots<S: StateStore>(&mut self, supplier: &TreeSupplier<D, S>) {
        let previous = self.selected_node().map(|node| node.key());
        self.roots = supplier.children(None).await;

        let live: Vec<Option<String>> = self
            .roots
            .iter()
            .map(|root| root.connection_id().map(str::to_string))
            .collect();
        self.children
            .retain(|key, _| live.contains(&key.connection_id));
        self.select_key(previous.as_ref());
    }

    pub(crate) async fn expand<S: StateStore>(
        &mut self,
        supplier: &TreeSupplier<D, S>,
        node: &TreeNode<D>,
    ) {
        if !node.is_expandable() {
            return;
        }
        let previous = self.selected_node().map(|selected| selected.key());
        let children = supplier.children(Some(node)).await;
        self.children.insert(node.key(), children);
        self.select_key(previous.as_ref());
    }

    pub(crate) fn collapse(&mut self, key: &NodeKey) {
        let previous = self.selected_node().map(|node| node.key());
        self.children.remove(key);
        self.select_key(previous.as_ref().or(Some(key)));
    }

    /// Re-fetches children of `key` if it is currently expanded.
    pub(crate) async fn refresh_key<S: StateStore>(
        &mut self,
        supplier: &TreeSupplier<D, S>,
        key: &NodeKey,
    ) {
        if !self.is_expanded(key) {
            return;
        }
        if let Some(node) = self.find(key) {
            self.expand(supplier, &node).await;
        }
    }
}

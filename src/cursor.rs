//! Depth-first cursor over every visible rule in a published tree,
//! optionally restricted to a single target rule (by `(match, priority)`
//! identity).

use std::sync::Arc;

use crate::node::Node;
use crate::rule::Rule;
use crate::version::Version;

struct StackEntry {
    node: Arc<Node>,
    visited_left: bool,
}

/// A depth-first walk over a tree snapshot. Holds an explicit path stack
/// of `Arc<Node>` clones rather than recursing, mirroring the original's
/// fixed-depth path array with a growable one.
pub struct Cursor {
    stack: Vec<StackEntry>,
    leaf_rules: Vec<Arc<Rule>>,
    leaf_index: usize,
    version: Version,
    target: Option<Arc<Rule>>,
    current: Option<Arc<Rule>>,
}

impl Cursor {
    pub fn start(root: Arc<Node>, target: Option<Arc<Rule>>, version: Version) -> Self {
        let mut cursor = Self {
            stack: Vec::new(),
            leaf_rules: Vec::new(),
            leaf_index: 0,
            version,
            target,
            current: None,
        };
        cursor.descend(root);
        cursor.advance_to_next_visible();
        cursor
    }

    fn descend(&mut self, mut node: Arc<Node>) {
        loop {
            match node.as_ref() {
                Node::Leaf(leaf) => {
                    self.leaf_rules = leaf.rules.clone();
                    self.leaf_index = 0;
                    return;
                }
                Node::Internal(internal) => {
                    let left = Arc::clone(&internal.left);
                    self.stack.push(StackEntry {
                        node: Arc::clone(&node),
                        visited_left: false,
                    });
                    node = left;
                }
            }
        }
    }

    fn matches_target(&self, rule: &Rule) -> bool {
        match &self.target {
            None => true,
            Some(t) => t.as_ref() == rule,
        }
    }

    fn advance_to_next_visible(&mut self) {
        loop {
            while self.leaf_index < self.leaf_rules.len() {
                let rule = Arc::clone(&self.leaf_rules[self.leaf_index]);
                self.leaf_index += 1;
                if rule.visible_in(self.version) && self.matches_target(&rule) {
                    self.current = Some(rule);
                    return;
                }
            }
            if !self.pop_and_descend_right() {
                self.current = None;
                return;
            }
        }
    }

    fn pop_and_descend_right(&mut self) -> bool {
        while let Some(entry) = self.stack.pop() {
            if !entry.visited_left {
                let internal = entry
                    .node
                    .as_internal()
                    .expect("stack holds only internal nodes");
                let right = Arc::clone(&internal.right);
                self.stack.push(StackEntry {
                    node: entry.node,
                    visited_left: true,
                });
                self.descend(right);
                return true;
            }
        }
        false
    }

    pub fn current(&self) -> Option<&Arc<Rule>> {
        self.current.as_ref()
    }

    pub fn advance(&mut self) {
        self.advance_to_next_visible();
    }
}

impl Iterator for Cursor {
    type Item = Arc<Rule>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.current.take();
        if item.is_some() {
            self.advance_to_next_visible();
        }
        item
    }
}

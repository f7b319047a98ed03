//! Concurrent, wait-free lookup: traverse the published tree from root
//! to a single leaf, then linearly pick the best visible matching rule.

use std::sync::Arc;

use crate::field::{FieldId, Flow};
use crate::node::Node;
use crate::rule::Rule;
use crate::version::Version;

/// Tracks, across a traversal, which bits of which fields the path taken
/// actually depended on. Starts fully wildcarded; each internal node
/// visited pins the bits its test depended on, and the matched rule's own
/// mask is folded in once a result is found. The resulting mask is safe
/// to use as a cache key for any flow that agrees with the looked-up flow
/// on exactly those bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct WildcardAccumulator {
    masks: [u32; FieldId::ALL.len()],
}

impl WildcardAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(field: FieldId) -> usize {
        FieldId::ALL.iter().position(|f| *f == field).unwrap()
    }

    pub fn mask(&self, field: FieldId) -> u32 {
        self.masks[Self::index(field)]
    }

    fn note_tested(&mut self, field: FieldId, pinned: u32) {
        let i = Self::index(field);
        self.masks[i] |= pinned;
    }

    fn fold_rule_mask(&mut self, rule: &Rule) {
        for field in FieldId::ALL {
            let i = Self::index(field);
            self.masks[i] |= rule.matches.mask(field);
        }
    }
}

/// Traverse `root` following field tests for `flow`, returning the reached
/// leaf. Optionally records the bits each test depended on into `wc`.
fn traverse<'a>(
    root: &'a Arc<Node>,
    flow: &Flow,
    mut wc: Option<&mut WildcardAccumulator>,
) -> &'a Node {
    let mut node = root.as_ref();
    loop {
        match node {
            Node::Leaf(_) => return node,
            Node::Internal(internal) => {
                let flow_value = flow.get(internal.field);
                let go_right = internal.test.eval(flow_value);
                if let Some(acc) = wc.as_deref_mut() {
                    acc.note_tested(internal.field, internal.test.pinned_mask());
                }
                node = if go_right {
                    internal.right.as_ref()
                } else {
                    internal.left.as_ref()
                };
            }
        }
    }
}

/// Scan a reached leaf's (already priority-sorted) rules for the first one
/// that is both satisfied by `flow` and visible at `version`. Because the
/// leaf is sorted by descending priority, the first such rule is the
/// unique answer.
fn select_from_leaf(
    leaf: &crate::node::LeafNode,
    flow: &Flow,
    version: Version,
) -> Option<Arc<Rule>> {
    leaf.rules
        .iter()
        .find(|r| r.visible_in(version) && r.matches.satisfied_by(flow))
        .map(Arc::clone)
}

pub fn lookup(root: &Arc<Node>, version: Version, flow: &Flow) -> Option<Arc<Rule>> {
    let leaf = traverse(root, flow, None).as_leaf().expect("traversal always ends at a leaf");
    select_from_leaf(leaf, flow, version)
}

pub fn lookup_wc(
    root: &Arc<Node>,
    version: Version,
    flow: &Flow,
    wc: &mut WildcardAccumulator,
) -> Option<Arc<Rule>> {
    let leaf = traverse(root, flow, Some(wc))
        .as_leaf()
        .expect("traversal always ends at a leaf");
    let result = select_from_leaf(leaf, flow, version);
    if let Some(rule) = &result {
        wc.fold_rule_mask(rule);
    }
    result
}

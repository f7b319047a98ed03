//! The decision-tree node model: a tagged internal/leaf variant with
//! copy-on-write shallow-copy support.

use std::sync::Arc;

use crate::field::{FieldId, Flow};
use crate::rule::Rule;

/// The test an internal node performs against a flow's field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Test {
    Exact(u32),
    Prefix { value: u32, plen: u8 },
    /// Reserved for future range-style tests; always evaluates false.
    Range,
}

impl Test {
    /// Evaluate the test against a concrete field value.
    pub fn eval(&self, flow_value: u32) -> bool {
        match *self {
            Test::Exact(v) => flow_value == v,
            Test::Prefix { value, plen } => {
                let mask = prefix_mask(plen);
                (flow_value & mask) == (value & mask)
            }
            Test::Range => false,
        }
    }

    /// The mask of bits this test pins once it has been evaluated along a
    /// traversal path (used by the wildcard accumulator).
    pub fn pinned_mask(&self) -> u32 {
        match *self {
            Test::Exact(_) => u32::MAX,
            Test::Prefix { plen, .. } => prefix_mask(plen),
            Test::Range => 0,
        }
    }
}

fn prefix_mask(plen: u8) -> u32 {
    if plen == 0 {
        0
    } else if plen >= 32 {
        u32::MAX
    } else {
        u32::MAX << (32 - plen)
    }
}

#[derive(Debug)]
pub struct InternalNode {
    pub field: FieldId,
    pub test: Test,
    pub left: Arc<Node>,
    pub right: Arc<Node>,
}

#[derive(Debug)]
pub struct LeafNode {
    pub leaf_id: u64,
    /// Kept sorted by strictly descending priority.
    pub rules: Vec<Arc<Rule>>,
}

#[derive(Debug)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn new_leaf(leaf_id: u64, mut rules: Vec<Arc<Rule>>) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Node::Leaf(LeafNode { leaf_id, rules })
    }

    pub fn new_internal(
        field: FieldId,
        test: Test,
        left: Arc<Node>,
        right: Arc<Node>,
    ) -> Self {
        Node::Internal(InternalNode {
            field,
            test,
            left,
            right,
        })
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(l) => Some(l),
            Node::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(i) => Some(i),
            Node::Leaf(_) => None,
        }
    }

    /// The copy-on-write primitive: a shallow copy that shares child
    /// subtrees (via `Arc::clone`) or rule references, never deep-copying
    /// anything below the node itself.
    pub fn shallow_copy(&self) -> Node {
        match self {
            Node::Internal(i) => Node::Internal(InternalNode {
                field: i.field,
                test: i.test,
                left: Arc::clone(&i.left),
                right: Arc::clone(&i.right),
            }),
            Node::Leaf(l) => Node::Leaf(LeafNode {
                leaf_id: l.leaf_id,
                rules: l.rules.clone(),
            }),
        }
    }

    /// Evaluate this node's test (if internal) against the given flow and
    /// return which child to descend into.
    pub fn test_direction(&self, flow: &Flow) -> Option<bool> {
        self.as_internal()
            .map(|i| i.test.eval(flow.get(i.field)))
    }
}

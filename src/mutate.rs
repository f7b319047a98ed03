//! Copy-on-write single-rule mutation: traverse to the target leaf while
//! recording the path, rebuild every ancestor as a shallow copy, and
//! return the new root.

use std::sync::Arc;

use crate::builder::MAX_DEPTH;
use crate::error::ClassifierError;
use crate::field::Flow;
use crate::node::Node;
use crate::rule::Rule;
use crate::version::Version;

/// One step of the recorded root-to-leaf path: the node visited and the
/// direction taken out of it (`false` = left, `true` = right).
struct PathStep {
    node: Arc<Node>,
    went_right: bool,
}

/// Traverse from `root` guided by `flow`'s field values (never "always
/// left" -- every step is test-guided), recording the path. Returns the
/// recorded path and the leaf reached.
fn record_path(root: &Arc<Node>, flow: &Flow) -> Result<(Vec<PathStep>, Arc<Node>), ClassifierError> {
    let mut path = Vec::new();
    let mut node = Arc::clone(root);
    loop {
        match node.as_ref() {
            Node::Leaf(_) => return Ok((path, node)),
            Node::Internal(internal) => {
                if path.len() >= MAX_DEPTH {
                    return Err(ClassifierError::CapacityExceeded { max: MAX_DEPTH });
                }
                let went_right = internal.test.eval(flow.get(internal.field));
                let next = if went_right {
                    Arc::clone(&internal.right)
                } else {
                    Arc::clone(&internal.left)
                };
                path.push(PathStep {
                    node: Arc::clone(&node),
                    went_right,
                });
                node = next;
            }
        }
    }
}

/// A flow that exercises exactly the fields a rule's match cares about,
/// used to guide traversal toward the leaf(s) that would hold that rule.
/// Wildcarded fields don't influence the path (any test on them is
/// satisfied by both children via builder duplication), so using the
/// rule's own (possibly partial) values is sufficient to reach a leaf
/// that legitimately may contain it.
fn flow_from_rule(rule: &Rule) -> Flow {
    let mut flow = Flow::new();
    for field in crate::field::FieldId::ALL {
        flow.set(field, rule.matches.value(field));
    }
    flow
}

/// Rebuild every ancestor on `path` as a shallow copy with the rewired
/// child replaced by `new_leaf`, returning the new root.
fn rebuild_path(path: Vec<PathStep>, new_leaf: Arc<Node>) -> Arc<Node> {
    let mut child = new_leaf;
    for step in path.into_iter().rev() {
        let mut copy = step.node.shallow_copy();
        if let Node::Internal(internal) = &mut copy {
            if step.went_right {
                internal.right = Arc::clone(&child);
            } else {
                internal.left = Arc::clone(&child);
            }
        }
        child = Arc::new(copy);
    }
    child
}

/// Insert `rule` into the tree rooted at `root`, replacing an existing
/// rule with an identical `(match, priority)` if one is found in the
/// reached leaf. Returns the new root and whether a duplicate was
/// replaced.
pub fn insert(
    root: &Arc<Node>,
    rule: Arc<Rule>,
    next_leaf_id: &mut dyn FnMut() -> u64,
) -> Result<(Arc<Node>, bool), ClassifierError> {
    let flow = flow_from_rule(&rule);
    let (path, leaf_node) = record_path(root, &flow)?;
    let leaf = leaf_node.as_leaf().expect("record_path ends at a leaf");

    let mut rules = leaf.rules.clone();
    let replaced = if let Some(pos) = rules.iter().position(|r| r.as_ref() == rule.as_ref()) {
        rules.remove(pos);
        true
    } else {
        false
    };
    let pos = rules
        .iter()
        .position(|r| r.priority < rule.priority)
        .unwrap_or(rules.len());
    rules.insert(pos, rule);

    let new_leaf = Arc::new(Node::new_leaf(next_leaf_id(), rules));
    Ok((rebuild_path(path, new_leaf), replaced))
}

/// Remove the rule matching `target` (by `(match, priority)`) from the
/// tree rooted at `root`. Fails with `NotFound` if the reached leaf does
/// not contain it.
pub fn remove(
    root: &Arc<Node>,
    target: &Rule,
    next_leaf_id: &mut dyn FnMut() -> u64,
) -> Result<Arc<Node>, ClassifierError> {
    let flow = flow_from_rule(target);
    let (path, leaf_node) = record_path(root, &flow)?;
    let leaf = leaf_node.as_leaf().expect("record_path ends at a leaf");

    let mut rules = leaf.rules.clone();
    let pos = rules
        .iter()
        .position(|r| r.as_ref() == target)
        .ok_or(ClassifierError::NotFound)?;
    rules.remove(pos);

    let new_leaf = Arc::new(Node::new_leaf(next_leaf_id(), rules));
    Ok(rebuild_path(path, new_leaf))
}

/// Find the rule matching `target` by `(match, priority)` identity and
/// visible at `version`, without mutating anything.
pub fn find_rule_exactly(root: &Arc<Node>, target: &Rule, version: Version) -> Option<Arc<Rule>> {
    let flow = flow_from_rule(target);
    let (_, leaf_node) = record_path(root, &flow).ok()?;
    let leaf = leaf_node.as_leaf().expect("record_path ends at a leaf");
    leaf.rules
        .iter()
        .find(|r| r.as_ref() == target && r.visible_in(version))
        .map(Arc::clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::config::BuilderConfig;
    use crate::field::FieldId;
    use crate::lookup::lookup;
    use crate::rule::Match;

    fn build_tree(rules: Vec<Arc<Rule>>) -> (Arc<Node>, u64) {
        let config = BuilderConfig::new(crate::config::BuildStrategy::Greedy, 2);
        let mut n = 0u64;
        let tree = build(rules, &config, 0, &mut (|| {
            let id = n;
            n += 1;
            id
        }));
        (tree, n)
    }

    #[test]
    fn insert_makes_new_rule_visible_without_disturbing_old_lookups() {
        let existing = Arc::new(Rule::new(Match::new().exact(FieldId::InPort, 1), 10));
        let (old_root, mut next_id) = build_tree(vec![Arc::clone(&existing)]);

        let new_rule = Arc::new(Rule::new(Match::new().exact(FieldId::InPort, 2), 20));
        let (new_root, replaced) =
            insert(&old_root, Arc::clone(&new_rule), &mut || {
                next_id += 1;
                next_id
            })
            .unwrap();
        assert!(!replaced);

        let flow1 = Flow::new().with(FieldId::InPort, 1);
        assert_eq!(lookup(&old_root, 0, &flow1), Some(Arc::clone(&existing)));
        assert_eq!(lookup(&new_root, 0, &flow1), Some(existing));

        let flow2 = Flow::new().with(FieldId::InPort, 2);
        assert_eq!(lookup(&new_root, 0, &flow2), Some(new_rule));
        assert_eq!(lookup(&old_root, 0, &flow2), None);
    }

    #[test]
    fn insert_duplicate_match_priority_replaces() {
        let m = Match::new().exact(FieldId::InPort, 1);
        let original = Arc::new(Rule::new(m, 10));
        let (root, mut next_id) = build_tree(vec![Arc::clone(&original)]);

        let replacement = Arc::new(Rule::new(m, 10));
        let (new_root, replaced) = insert(&root, Arc::clone(&replacement), &mut || {
            next_id += 1;
            next_id
        })
        .unwrap();
        assert!(replaced);

        let flow = Flow::new().with(FieldId::InPort, 1);
        let found = lookup(&new_root, 0, &flow).unwrap();
        assert!(Arc::ptr_eq(&found, &replacement));
    }

    #[test]
    fn remove_absent_rule_errs() {
        let (root, mut next_id) = build_tree(vec![]);
        let absent = Rule::new(Match::new(), 1);
        let err = remove(&root, &absent, &mut || {
            next_id += 1;
            next_id
        })
        .unwrap_err();
        assert_eq!(err, ClassifierError::NotFound);
    }

    #[test]
    fn remove_existing_rule_hides_it_from_new_root_only() {
        let rule = Arc::new(Rule::new(Match::new().exact(FieldId::InPort, 5), 10));
        let (old_root, mut next_id) = build_tree(vec![Arc::clone(&rule)]);
        let new_root = remove(&old_root, &rule, &mut || {
            next_id += 1;
            next_id
        })
        .unwrap();

        let flow = Flow::new().with(FieldId::InPort, 5);
        assert_eq!(lookup(&old_root, 0, &flow), Some(rule));
        assert_eq!(lookup(&new_root, 0, &flow), None);
    }
}

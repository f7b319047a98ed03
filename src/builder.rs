//! Recursive decision-tree builder: choose a split field and value,
//! partition rules with duplication across the cut, and recurse.

use std::sync::Arc;

use crate::config::BuilderConfig;
use crate::field::FieldId;
use crate::node::{Node, Test};
use crate::rule::Rule;

pub const MAX_DEPTH: usize = 64;

/// Builds a subtree from an owned set of rules. `next_leaf_id` hands out
/// diagnostic leaf identifiers; callers pass a shared counter so ids stay
/// unique across a whole build.
pub fn build(
    rules: Vec<Arc<Rule>>,
    config: &BuilderConfig,
    depth: usize,
    next_leaf_id: &mut dyn FnMut() -> u64,
) -> Arc<Node> {
    if rules.len() <= config.leaf_threshold || depth >= MAX_DEPTH {
        return Arc::new(Node::new_leaf(next_leaf_id(), rules));
    }

    match select_split(&rules) {
        Some((field, pivot)) => {
            let (left, right) = partition(&rules, field, pivot);
            if left.is_empty() || right.is_empty() {
                return Arc::new(Node::new_leaf(next_leaf_id(), rules));
            }
            let left = build(left, config, depth + 1, next_leaf_id);
            let right = build(right, config, depth + 1, next_leaf_id);
            Arc::new(Node::new_internal(field, Test::Exact(pivot), left, right))
        }
        None => Arc::new(Node::new_leaf(next_leaf_id(), rules)),
    }
}

/// Choose the first candidate field (in `FieldId::SPLIT_CANDIDATES`
/// order) that yields a usable split value, along with that value.
fn select_split(rules: &[Arc<Rule>]) -> Option<(FieldId, u32)> {
    for field in FieldId::SPLIT_CANDIDATES {
        if let Some(pivot) = find_split_value(rules, field) {
            return Some((field, pivot));
        }
    }
    None
}

/// The median of the distinct, non-wildcarded values rules take on for
/// `field`. Returns `None` if fewer than two distinct values exist (the
/// field can't usefully split this rule set).
fn find_split_value(rules: &[Arc<Rule>], field: FieldId) -> Option<u32> {
    let mut values: Vec<u32> = rules
        .iter()
        .filter(|r| !r.matches.is_wildcard(field))
        .map(|r| r.matches.value(field))
        .collect();
    values.sort_unstable();
    values.dedup();
    if values.len() < 2 {
        return None;
    }
    Some(values[values.len() / 2])
}

/// Partition rules by whether their range for `field` falls below, above,
/// or straddles `pivot`. Straddling (or fully wildcarded) rules are
/// duplicated into both sides -- this is what keeps lookups correct in
/// the face of wildcarded and range-spanning rules.
fn partition(
    rules: &[Arc<Rule>],
    field: FieldId,
    pivot: u32,
) -> (Vec<Arc<Rule>>, Vec<Arc<Rule>>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for rule in rules {
        let (lo, hi) = rule.matches.range(field);
        if lo < pivot {
            left.push(Arc::clone(rule));
        }
        if hi >= pivot {
            right.push(Arc::clone(rule));
        }
    }
    (left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldId, Flow};
    use crate::rule::Match;

    fn counter() -> impl FnMut() -> u64 {
        let mut n = 0u64;
        move || {
            let id = n;
            n += 1;
            id
        }
    }

    fn rule(field: FieldId, value: u32, priority: u32) -> Arc<Rule> {
        Arc::new(Rule::new(Match::new().exact(field, value), priority))
    }

    #[test]
    fn builds_leaf_below_threshold() {
        let rules = vec![rule(FieldId::InPort, 1, 10)];
        let config = BuilderConfig::default();
        let mut next = counter();
        let tree = build(rules, &config, 0, &mut next);
        assert!(tree.as_leaf().is_some());
    }

    #[test]
    fn splits_above_threshold_and_every_rule_reachable() {
        let config = BuilderConfig::new(crate::config::BuildStrategy::Greedy, 2);
        let rules: Vec<_> = (0..20)
            .map(|i| rule(FieldId::Ipv4Src, i, i))
            .collect();
        let mut next = counter();
        let tree = build(rules.clone(), &config, 0, &mut next);
        assert!(tree.as_internal().is_some());

        for i in 0..20u32 {
            let flow = Flow::new().with(FieldId::Ipv4Src, i);
            let mut node = &tree;
            loop {
                match node.as_internal() {
                    Some(internal) => {
                        let go_right = internal.test.eval(flow.get(internal.field));
                        node = if go_right { &internal.right } else { &internal.left };
                    }
                    None => break,
                }
            }
            let leaf = node.as_leaf().unwrap();
            assert!(leaf.rules.iter().any(|r| r.priority == i));
        }
    }

    #[test]
    fn wildcarded_rule_is_duplicated_across_the_cut() {
        let config = BuilderConfig::new(crate::config::BuildStrategy::Greedy, 2);
        let rules = vec![
            rule(FieldId::Ipv4Src, 1, 1),
            rule(FieldId::Ipv4Src, 3, 2),
            Arc::new(Rule::new(Match::new(), 100)),
        ];
        let mut next = counter();
        let tree = build(rules, &config, 0, &mut next);
        let internal = tree.as_internal().unwrap();
        let left = internal.left.as_leaf().expect("left should be a leaf");
        let right = internal.right.as_leaf().expect("right should be a leaf");
        assert!(left.rules.iter().any(|r| r.priority == 100));
        assert!(right.rules.iter().any(|r| r.priority == 100));
    }
}

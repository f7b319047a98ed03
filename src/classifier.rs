//! The classifier itself: lazy tree construction, copy-on-write mutation,
//! defer/publish batching, and concurrent lookup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use slog::Logger;

use crate::builder;
use crate::config::BuilderConfig;
use crate::cursor::Cursor;
use crate::error::ClassifierError;
use crate::field::Flow;
use crate::lookup::{self, WildcardAccumulator};
use crate::mutate;
use crate::node::Node;
use crate::reclaim::{DropReclaimer, Reclaimer};
use crate::rule::{Match, Rule};
use crate::version::Version;

/// Snapshot of classifier-wide counters, refreshed after every build and
/// maintained incrementally across mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Distinct logical rules currently held, counted once regardless of
    /// how many leaves the builder duplicated a wildcarded or
    /// range-spanning rule into.
    pub n_rules: usize,
    pub n_internal_nodes: usize,
    pub n_leaf_nodes: usize,
    pub max_depth: usize,
}

#[derive(Default)]
struct AtomicStats {
    n_rules: AtomicUsize,
    n_internal_nodes: AtomicUsize,
    n_leaf_nodes: AtomicUsize,
    max_depth: AtomicUsize,
}

impl AtomicStats {
    fn snapshot(&self) -> Stats {
        Stats {
            n_rules: self.n_rules.load(Ordering::Relaxed),
            n_internal_nodes: self.n_internal_nodes.load(Ordering::Relaxed),
            n_leaf_nodes: self.n_leaf_nodes.load(Ordering::Relaxed),
            max_depth: self.max_depth.load(Ordering::Relaxed),
        }
    }

    /// Update the tree-shape counters (internal/leaf nodes, depth). Does
    /// *not* touch `n_rules`: that counter tracks distinct logical rules,
    /// not leaf occupancy, and is maintained separately by
    /// `inc_rules`/`dec_rules`/`set_n_rules` at the call sites that know
    /// whether a mutation actually added or removed a distinct rule.
    fn set_structural(&self, s: StructuralStats) {
        self.n_internal_nodes.store(s.n_internal_nodes, Ordering::Relaxed);
        self.n_leaf_nodes.store(s.n_leaf_nodes, Ordering::Relaxed);
        self.max_depth.store(s.max_depth, Ordering::Relaxed);
    }

    fn set_n_rules(&self, n: usize) {
        self.n_rules.store(n, Ordering::Relaxed);
    }

    fn inc_rules(&self) {
        self.n_rules.fetch_add(1, Ordering::Relaxed);
    }

    fn dec_rules(&self) {
        self.n_rules.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Tree-shape counters derived purely from walking the tree. Rule-count
/// statistics are tracked independently (see `AtomicStats`) because §4.3
/// duplication means the same logical rule can occupy more than one leaf;
/// summing leaf occupancy would overcount any wildcarded or range-spanning
/// rule by the number of leaves it was duplicated into.
#[derive(Debug, Clone, Copy, Default)]
struct StructuralStats {
    n_internal_nodes: usize,
    n_leaf_nodes: usize,
    max_depth: usize,
}

fn calculate_stats(node: &Node, depth: usize) -> StructuralStats {
    match node {
        Node::Leaf(_) => StructuralStats {
            n_internal_nodes: 0,
            n_leaf_nodes: 1,
            max_depth: depth,
        },
        Node::Internal(internal) => {
            let left = calculate_stats(&internal.left, depth + 1);
            let right = calculate_stats(&internal.right, depth + 1);
            StructuralStats {
                n_internal_nodes: left.n_internal_nodes + right.n_internal_nodes + 1,
                n_leaf_nodes: left.n_leaf_nodes + right.n_leaf_nodes,
                max_depth: left.max_depth.max(right.max_depth),
            }
        }
    }
}

/// A concurrent decision-tree packet classifier.
///
/// Readers call [`Classifier::lookup`] (or iterate via [`Classifier::cursor`])
/// through a shared `&Classifier` with no locking. Per-rule mutations
/// ([`Classifier::insert_rule`], [`Classifier::remove_rule`],
/// [`Classifier::replace_rule`]) also take `&self`; callers are still
/// responsible for serializing concurrent writers, exactly as the
/// original assumed an external lock. [`Classifier::defer`] and
/// [`Classifier::publish`] instead take `&mut self`, so a caller holding a
/// batch open gets a compile-time guarantee that nothing else can mutate
/// the classifier out from under it for the bracket's duration.
pub struct Classifier {
    root: ArcSwapOption<Node>,
    shadow: ArcSwapOption<Node>,
    defer_depth: u32,
    tree_built: AtomicBool,
    pending: Mutex<Vec<Arc<Rule>>>,
    next_leaf_id: AtomicU64,
    config: BuilderConfig,
    logger: Logger,
    reclaimer: Arc<dyn Reclaimer>,
    stats: AtomicStats,
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_config_and_logger(BuilderConfig::default(), Logger::root(slog::Discard, slog::o!()))
    }

    pub fn with_config(config: BuilderConfig) -> Self {
        Self::with_config_and_logger(config, Logger::root(slog::Discard, slog::o!()))
    }

    pub fn with_logger(logger: Logger) -> Self {
        Self::with_config_and_logger(BuilderConfig::default(), logger)
    }

    pub fn with_config_and_logger(config: BuilderConfig, logger: Logger) -> Self {
        Self {
            root: ArcSwapOption::from(None),
            shadow: ArcSwapOption::from(None),
            defer_depth: 0,
            tree_built: AtomicBool::new(false),
            pending: Mutex::new(Vec::new()),
            next_leaf_id: AtomicU64::new(0),
            config,
            logger,
            reclaimer: Arc::new(DropReclaimer),
            stats: AtomicStats::default(),
        }
    }

    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn Reclaimer>) -> Self {
        self.reclaimer = reclaimer;
        self
    }

    fn next_leaf_id(&self) -> u64 {
        self.next_leaf_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Append a rule before the tree has been built. Once the tree has
    /// been built, use [`Classifier::insert_rule`] instead.
    pub fn add_rule_lazy(&self, rule: Arc<Rule>) -> Result<(), ClassifierError> {
        if self.tree_built.load(Ordering::Acquire) {
            return Err(ClassifierError::Misuse(
                "add_rule_lazy called after the tree has been built",
            ));
        }
        self.pending.lock().unwrap().push(rule);
        Ok(())
    }

    /// Double-checked-locking lazy build: the fast path is a single
    /// relaxed/acquire atomic load; only the very first caller pays the
    /// cost of draining `pending` through the builder.
    pub fn ensure_tree_built(&self) {
        if self.tree_built.load(Ordering::Acquire) {
            return;
        }
        let mut pending = self.pending.lock().unwrap();
        if self.tree_built.load(Ordering::Acquire) {
            return;
        }
        let rules: Vec<Arc<Rule>> = pending.drain(..).collect();
        let n_rules = rules.len();
        let id_counter = &self.next_leaf_id;
        let root = if rules.is_empty() {
            None
        } else {
            Some(builder::build(rules, &self.config, 0, &mut || {
                id_counter.fetch_add(1, Ordering::Relaxed)
            }))
        };
        match &root {
            Some(r) => self.stats.set_structural(calculate_stats(r, 0)),
            None => self.stats.set_structural(StructuralStats::default()),
        }
        self.stats.set_n_rules(n_rules);
        self.root.store(root);
        self.tree_built.store(true, Ordering::Release);
        slog::debug!(self.logger, "lazy tree build complete"; "n_rules" => self.stats.snapshot().n_rules);
    }

    fn working_root(&self) -> arc_swap::Guard<Option<Arc<Node>>> {
        if self.defer_depth > 0 {
            self.shadow.load()
        } else {
            self.root.load()
        }
    }

    fn publish_working_root(&self, new_root: Arc<Node>) {
        self.stats.set_structural(calculate_stats(&new_root, 0));
        if self.defer_depth > 0 {
            let old = self.shadow.swap(Some(new_root));
            if let Some(old) = old {
                self.reclaimer.retire(old);
            }
        } else {
            let old = self.root.swap(Some(new_root));
            if let Some(old) = old {
                self.reclaimer.retire(old);
            }
        }
    }

    /// Insert `rule`, replacing any existing rule with the same
    /// `(match, priority)`. Before the first build, this is equivalent to
    /// [`Classifier::add_rule_lazy`].
    pub fn insert_rule(&self, rule: Arc<Rule>) -> Result<(), ClassifierError> {
        if !self.tree_built.load(Ordering::Acquire) {
            return self.add_rule_lazy(rule);
        }
        self.ensure_tree_built();
        let working = self.working_root();
        let root = match working.as_ref() {
            Some(r) => Arc::clone(r),
            None => {
                drop(working);
                let id_counter = &self.next_leaf_id;
                let leaf = Arc::new(Node::new_leaf(
                    id_counter.fetch_add(1, Ordering::Relaxed),
                    vec![rule],
                ));
                self.stats.inc_rules();
                self.publish_working_root(leaf);
                return Ok(());
            }
        };
        drop(working);
        let id_counter = &self.next_leaf_id;
        let (new_root, replaced) = mutate::insert(&root, rule, &mut || {
            id_counter.fetch_add(1, Ordering::Relaxed)
        })?;
        if replaced {
            slog::warn!(self.logger, "insert replaced an existing rule with identical match and priority");
        } else {
            self.stats.inc_rules();
        }
        self.publish_working_root(new_root);
        Ok(())
    }

    /// Remove the rule matching `target` by `(match, priority)` identity.
    pub fn remove_rule(&self, target: &Rule) -> Result<(), ClassifierError> {
        self.ensure_tree_built();
        let working = self.working_root();
        let root = working.as_ref().cloned().ok_or(ClassifierError::NotFound)?;
        drop(working);
        let id_counter = &self.next_leaf_id;
        let new_root = mutate::remove(&root, target, &mut || {
            id_counter.fetch_add(1, Ordering::Relaxed)
        })?;
        self.stats.dec_rules();
        self.publish_working_root(new_root);
        Ok(())
    }

    /// Replace the rule matching `new_rule`'s `(match, priority)` with
    /// `new_rule` itself, returning the displaced rule if one existed.
    pub fn replace_rule(&self, new_rule: Arc<Rule>) -> Result<Option<Arc<Rule>>, ClassifierError> {
        let previous = self.find_rule_exactly(&new_rule, Version::MAX);
        if let Some(old) = &previous {
            self.remove_rule(old)?;
        }
        self.insert_rule(new_rule)?;
        Ok(previous)
    }

    /// Look up the best visible rule for `flow` at `version`.
    pub fn lookup(&self, version: Version, flow: &Flow) -> Option<Arc<Rule>> {
        self.ensure_tree_built();
        let root = self.root.load();
        let root = root.as_ref()?;
        lookup::lookup(root, version, flow)
    }

    /// Like [`Classifier::lookup`], additionally recording which bits of
    /// which fields the result actually depended on.
    pub fn lookup_wc(
        &self,
        version: Version,
        flow: &Flow,
        wc: &mut WildcardAccumulator,
    ) -> Option<Arc<Rule>> {
        self.ensure_tree_built();
        let root = self.root.load();
        let root = root.as_ref()?;
        lookup::lookup_wc(root, version, flow, wc)
    }

    pub fn find_rule_exactly(&self, target: &Rule, version: Version) -> Option<Arc<Rule>> {
        self.ensure_tree_built();
        let root = self.root.load();
        let root = root.as_ref()?;
        mutate::find_rule_exactly(root, target, version)
    }

    pub fn find_match_exactly(
        &self,
        matches: &Match,
        priority: u32,
        version: Version,
    ) -> Option<Arc<Rule>> {
        let probe = Rule::new(*matches, priority);
        self.find_rule_exactly(&probe, version)
    }

    /// Begin (or nest into) a deferred-update bracket: subsequent
    /// mutations accumulate in a shadow root invisible to readers until
    /// the matching [`Classifier::publish`].
    pub fn defer(&mut self) {
        if self.defer_depth == 0 {
            let current = self.root.load();
            self.shadow.store(current.as_ref().cloned());
        } else {
            slog::warn!(self.logger, "nested defer"; "depth" => self.defer_depth);
        }
        self.defer_depth += 1;
    }

    /// End a deferred-update bracket; on the outermost `publish`,
    /// atomically installs the shadow root as the new published root.
    pub fn publish(&mut self) {
        if self.defer_depth == 0 {
            slog::warn!(self.logger, "publish called without a matching defer");
            return;
        }
        self.defer_depth -= 1;
        if self.defer_depth == 0 {
            let new_root = self.shadow.load();
            let old = self.root.swap(new_root.as_ref().cloned());
            if let Some(old) = old {
                self.reclaimer.retire(old);
            }
            self.shadow.store(None);
        }
    }

    /// A cursor over every rule visible at `version`, optionally
    /// restricted to one matching `target`.
    pub fn cursor(&self, target: Option<Arc<Rule>>, version: Version) -> Cursor {
        self.ensure_tree_built();
        let root = self.root.load();
        match root.as_ref().cloned() {
            Some(r) => Cursor::start(r, target, version),
            None => Cursor::start(Arc::new(Node::new_leaf(0, Vec::new())), target, version),
        }
    }

    pub fn get_stats(&self) -> Stats {
        self.stats.snapshot()
    }

    /// Explicit full rebuild: walk every currently visible rule via a
    /// cursor and rerun the builder from scratch. Not triggered
    /// automatically by any mutation -- see the module-level notes on
    /// duplicated-rule mutation in `SPEC_FULL.md`.
    pub fn rebuild_tree(&mut self, version: Version) {
        // A duplicated (wildcarded or range-spanning) rule can be yielded
        // once per leaf it occupies; collapse back to one entry each
        // before feeding the builder, which expects a rule set with no
        // pre-existing duplication of its own.
        let mut seen: HashSet<Arc<Rule>> = HashSet::new();
        let rules: Vec<Arc<Rule>> = self
            .cursor(None, version)
            .filter(|r| seen.insert(Arc::clone(r)))
            .collect();
        let n_rules = rules.len();
        let id_counter = &self.next_leaf_id;
        let new_root = if rules.is_empty() {
            None
        } else {
            Some(builder::build(rules, &self.config, 0, &mut || {
                id_counter.fetch_add(1, Ordering::Relaxed)
            }))
        };
        match &new_root {
            Some(r) => self.stats.set_structural(calculate_stats(r, 0)),
            None => self.stats.set_structural(StructuralStats::default()),
        }
        self.stats.set_n_rules(n_rules);
        let old = self.root.swap(new_root);
        if let Some(old) = old {
            self.reclaimer.retire(old);
        }
        self.tree_built.store(true, Ordering::Release);
    }

    pub fn format_tree(&self, prefix: &str) -> String {
        let root = self.root.load();
        match root.as_ref() {
            Some(r) => format_node(r, prefix, 0),
            None => format!("{prefix}(empty)\n"),
        }
    }

    pub fn print_tree(&self, prefix: &str) {
        print!("{}", self.format_tree(prefix));
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn format_node(node: &Node, prefix: &str, depth: usize) -> String {
    let indent = "  ".repeat(depth);
    match node {
        Node::Leaf(leaf) => format!(
            "{prefix}{indent}leaf#{} ({} rules)\n",
            leaf.leaf_id,
            leaf.rules.len()
        ),
        Node::Internal(internal) => {
            let mut s = format!(
                "{prefix}{indent}test {} {:?}\n",
                internal.field, internal.test
            );
            s.push_str(&format_node(&internal.left, prefix, depth + 1));
            s.push_str(&format_node(&internal.right, prefix, depth + 1));
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldId;

    #[test]
    fn empty_classifier_lookup_returns_none() {
        let c = Classifier::new();
        assert_eq!(c.lookup(0, &Flow::new()), None);
    }

    #[test]
    fn lazy_build_then_lookup() {
        let c = Classifier::new();
        let rule = Arc::new(Rule::new(Match::new().exact(FieldId::InPort, 1), 10));
        c.add_rule_lazy(Arc::clone(&rule)).unwrap();
        let flow = Flow::new().with(FieldId::InPort, 1);
        assert_eq!(c.lookup(0, &flow), Some(rule));
        assert_eq!(c.get_stats().n_rules, 1);
    }

    #[test]
    fn insert_after_build_is_cow() {
        let c = Classifier::new();
        c.insert_rule(Arc::new(Rule::new(Match::new().exact(FieldId::InPort, 1), 10)))
            .unwrap();
        c.ensure_tree_built();
        c.insert_rule(Arc::new(Rule::new(Match::new().exact(FieldId::InPort, 2), 20)))
            .unwrap();

        let f1 = Flow::new().with(FieldId::InPort, 1);
        let f2 = Flow::new().with(FieldId::InPort, 2);
        assert_eq!(c.lookup(0, &f1).unwrap().priority, 10);
        assert_eq!(c.lookup(0, &f2).unwrap().priority, 20);
    }

    #[test]
    fn remove_then_lookup_misses() {
        let c = Classifier::new();
        let rule = Arc::new(Rule::new(Match::new().exact(FieldId::InPort, 1), 10));
        c.insert_rule(Arc::clone(&rule)).unwrap();
        c.ensure_tree_built();
        c.remove_rule(&rule).unwrap();
        let f1 = Flow::new().with(FieldId::InPort, 1);
        assert_eq!(c.lookup(0, &f1), None);
    }

    #[test]
    fn remove_absent_after_build_errs() {
        let c = Classifier::new();
        c.insert_rule(Arc::new(Rule::new(Match::new(), 1))).unwrap();
        c.ensure_tree_built();
        let absent = Rule::new(Match::new().exact(FieldId::InPort, 99), 5);
        assert_eq!(c.remove_rule(&absent), Err(ClassifierError::NotFound));
    }

    #[test]
    fn defer_publish_batches_are_invisible_until_published() {
        let mut c = Classifier::new();
        c.insert_rule(Arc::new(Rule::new(Match::new(), 1))).unwrap();
        c.ensure_tree_built();

        c.defer();
        for p in [100u32, 90, 80, 70, 60] {
            c.insert_rule(Arc::new(Rule::new(
                Match::new().exact(FieldId::InPort, p),
                p,
            )))
            .unwrap();
        }
        // Still invisible: published root only has the original catchall.
        let probe = Flow::new().with(FieldId::InPort, 100);
        assert_eq!(c.lookup(0, &probe).unwrap().priority, 1);

        c.publish();
        assert_eq!(c.lookup(0, &probe).unwrap().priority, 100);
    }

    #[test]
    fn unbalanced_publish_is_a_harmless_no_op() {
        let mut c = Classifier::new();
        c.publish();
        c.insert_rule(Arc::new(Rule::new(Match::new(), 1))).unwrap();
        assert_eq!(c.get_stats().n_rules, 1);
    }

    #[test]
    fn replace_rule_swaps_reference_and_returns_old() {
        let c = Classifier::new();
        let m = Match::new().exact(FieldId::InPort, 1);
        let original = Arc::new(Rule::new(m, 10));
        c.insert_rule(Arc::clone(&original)).unwrap();
        c.ensure_tree_built();

        let replacement = Arc::new(Rule::new(m, 10));
        let displaced = c.replace_rule(Arc::clone(&replacement)).unwrap();
        assert_eq!(displaced, Some(original.clone()));

        let flow = Flow::new().with(FieldId::InPort, 1);
        let found = c.lookup(0, &flow).unwrap();
        assert!(Arc::ptr_eq(&found, &replacement));
    }

    #[test]
    fn replace_rule_finds_a_bound_not_yet_removed_rule_at_version_max() {
        use crate::version::VisibilityRecord;

        let c = Classifier::new();
        let m = Match::new().exact(FieldId::InPort, 1);
        // A rule bound to a surrounding flow-table transaction: added at
        // some version, never scheduled for removal. `replace_rule`
        // queries visibility at `Version::MAX` ("always visible"), which
        // must still find this rule.
        let original = Arc::new(Rule::new(m, 10).with_visibility(VisibilityRecord::new(3)));
        c.insert_rule(Arc::clone(&original)).unwrap();
        c.ensure_tree_built();

        let replacement = Arc::new(Rule::new(m, 10));
        let displaced = c.replace_rule(Arc::clone(&replacement)).unwrap();
        assert_eq!(displaced, Some(original));
    }

    #[test]
    fn rebuild_tree_preserves_all_visible_rules() {
        let mut c = Classifier::new();
        for i in 0..30u32 {
            c.insert_rule(Arc::new(Rule::new(
                Match::new().exact(FieldId::Ipv4Src, i),
                i,
            )))
            .unwrap();
        }
        c.ensure_tree_built();
        c.rebuild_tree(Version::MAX);
        assert_eq!(c.get_stats().n_rules, 30);
        for i in 0..30u32 {
            let flow = Flow::new().with(FieldId::Ipv4Src, i);
            assert_eq!(c.lookup(0, &flow).unwrap().priority, i);
        }
    }
}

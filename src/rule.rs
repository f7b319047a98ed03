//! Rule matches and the rule objects the classifier indexes.

use std::hash::{Hash, Hasher};

use crate::field::{FieldId, Flow};
use crate::version::{Version, VisibilityRecord};

/// A per-field (value, mask) pattern. `mask == 0` for a field means that
/// field is wildcarded (not cared about).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    entries: [(u32, u32); FieldId::ALL.len()],
}

impl Default for Match {
    fn default() -> Self {
        Self {
            entries: [(0, 0); FieldId::ALL.len()],
        }
    }
}

impl Match {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(field: FieldId) -> usize {
        FieldId::ALL.iter().position(|f| *f == field).unwrap()
    }

    pub fn value(&self, field: FieldId) -> u32 {
        self.entries[Self::index(field)].0
    }

    pub fn mask(&self, field: FieldId) -> u32 {
        self.entries[Self::index(field)].1
    }

    pub fn is_wildcard(&self, field: FieldId) -> bool {
        self.mask(field) == 0
    }

    /// Set an exact-match requirement on `field`.
    pub fn exact(mut self, field: FieldId, value: u32) -> Self {
        self.entries[Self::index(field)] = (value, u32::MAX);
        self
    }

    /// Set a masked-match requirement on `field`.
    pub fn masked(mut self, field: FieldId, value: u32, mask: u32) -> Self {
        self.entries[Self::index(field)] = (value & mask, mask);
        self
    }

    /// Set a prefix-match requirement on `field`: the top `plen` bits of
    /// `value` must match.
    pub fn prefix(mut self, field: FieldId, value: u32, plen: u8) -> Self {
        let mask = prefix_mask(plen);
        self.entries[Self::index(field)] = (value & mask, mask);
        self
    }

    /// The inclusive range `[lo, hi]` this match allows for `field`.
    pub fn range(&self, field: FieldId) -> (u32, u32) {
        let (value, mask) = self.entries[Self::index(field)];
        (value & mask, value | !mask)
    }

    pub fn satisfied_by(&self, flow: &Flow) -> bool {
        FieldId::ALL.iter().all(|&field| {
            let (value, mask) = self.entries[Self::index(field)];
            (flow.get(field) & mask) == (value & mask)
        })
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

/// A single classifier entry: a match pattern, a priority (higher wins),
/// and an optional version-visibility window.
#[derive(Debug, Clone)]
pub struct Rule {
    pub matches: Match,
    pub priority: u32,
    pub visibility: Option<VisibilityRecord>,
}

impl Rule {
    pub fn new(matches: Match, priority: u32) -> Self {
        Self {
            matches,
            priority,
            visibility: None,
        }
    }

    pub fn with_visibility(mut self, visibility: VisibilityRecord) -> Self {
        self.visibility = Some(visibility);
        self
    }

    /// A rule with no bound visibility record is always visible; this is
    /// what makes the classifier usable without a surrounding flow table.
    pub fn visible_in(&self, version: Version) -> bool {
        match &self.visibility {
            None => true,
            Some(v) => v.visible_in(version),
        }
    }
}

/// Identity for the "at most one rule per (match, priority)" invariant:
/// equality and hashing both ignore `visibility`.
impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.matches == other.matches && self.priority == other.priority
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.matches.entries.hash(state);
        self.priority.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_satisfied_only_by_equal_value() {
        let m = Match::new().exact(FieldId::InPort, 1);
        assert!(m.satisfied_by(&Flow::new().with(FieldId::InPort, 1)));
        assert!(!m.satisfied_by(&Flow::new().with(FieldId::InPort, 2)));
    }

    #[test]
    fn wildcard_matches_anything() {
        let m = Match::new();
        assert!(m.satisfied_by(&Flow::new().with(FieldId::Ipv4Src, 0xdeadbeef)));
    }

    #[test]
    fn prefix_match_checks_top_bits_only() {
        let m = Match::new().prefix(FieldId::Ipv4Src, 0x0a000000, 8);
        assert!(m.satisfied_by(&Flow::new().with(FieldId::Ipv4Src, 0x0a00ffff)));
        assert!(!m.satisfied_by(&Flow::new().with(FieldId::Ipv4Src, 0x0b000000)));
    }

    #[test]
    fn range_reflects_mask() {
        let m = Match::new().masked(FieldId::L4DstPort, 0x0050, 0xfff0);
        let (lo, hi) = m.range(FieldId::L4DstPort);
        assert_eq!(lo, 0x0050);
        assert_eq!(hi, 0x005f);
    }

    #[test]
    fn rule_identity_ignores_visibility() {
        let m = Match::new().exact(FieldId::InPort, 1);
        let a = Rule::new(m, 10);
        let b = Rule::new(m, 10).with_visibility(VisibilityRecord::new(5));
        assert_eq!(a, b);
    }

    #[test]
    fn rule_without_visibility_always_visible() {
        let r = Rule::new(Match::new(), 1);
        assert!(r.visible_in(0));
        assert!(r.visible_in(u64::MAX));
    }
}

//! Tree-build configuration.

/// Builder strategy. Only `Greedy` is implemented; `Simple` and `Balanced`
/// are accepted for API completeness but currently behave identically to
/// `Greedy` (reserved extension point).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStrategy {
    Simple,
    Greedy,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderConfig {
    pub strategy: BuildStrategy,
    /// Rule-count threshold below which a node becomes a leaf rather than
    /// being split further.
    pub leaf_threshold: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            strategy: BuildStrategy::Greedy,
            leaf_threshold: 8,
        }
    }
}

impl BuilderConfig {
    /// `leaf_threshold` is used as given (floored at 1, since a leaf must
    /// hold at least the single rule it was handed). The spec's 5..16
    /// range is a recommendation for the *default*, not an enforced bound
    /// on caller-supplied configuration -- callers (including tests) may
    /// legitimately want a smaller threshold to force splits on small
    /// rule sets.
    pub fn new(strategy: BuildStrategy, leaf_threshold: usize) -> Self {
        Self {
            strategy,
            leaf_threshold: leaf_threshold.max(1),
        }
    }
}

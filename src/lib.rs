//! Concurrent decision-tree packet classifier.
//!
//! A [`Classifier`] indexes a set of [`Rule`]s, each of which matches a
//! subset of recognized packet [`FieldId`]s with optional wildcarding, and
//! resolves a concrete [`Flow`] to the highest-priority visible rule that
//! matches it. Lookups are wait-free once the tree has been built;
//! mutations rebuild only the root-to-leaf path they touch, publishing a
//! new root atomically so concurrent readers never observe a partial
//! update.

pub mod builder;
pub mod classifier;
pub mod config;
pub mod cursor;
pub mod error;
pub mod field;
pub mod lookup;
pub mod mutate;
pub mod node;
pub mod reclaim;
pub mod rule;
pub mod version;

pub use classifier::{Classifier, Stats};
pub use config::{BuildStrategy, BuilderConfig};
pub use error::ClassifierError;
pub use field::{FieldId, Flow};
pub use lookup::WildcardAccumulator;
pub use node::{Node, Test};
pub use reclaim::{DropReclaimer, Reclaimer};
pub use rule::{Match, Rule};
pub use version::{Version, VisibilityRecord, VERSION_MAX};

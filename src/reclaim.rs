//! Reclamation hook for replaced subtrees.
//!
//! A mutation publishes a new root; the old root becomes unreachable
//! through the classifier but may still be reachable through a reader's
//! own `Arc` clone obtained before the swap. The `Reclaimer` trait gives
//! the classifier a named place to hand off the old root; the default
//! implementation simply drops it, letting `Arc`'s reference count do the
//! actual work of postponing destruction until the last reader is done.

use std::fmt;
use std::sync::Arc;

use crate::node::Node;

pub trait Reclaimer: fmt::Debug + Send + Sync {
    /// Called with the root of a subtree that has just been replaced and
    /// is no longer reachable from the classifier's published state.
    fn retire(&self, old: Arc<Node>);
}

/// Default reclaimer: drop the `Arc`, relying on reference counting.
/// Destruction happens whenever the last clone (reader or writer) of the
/// retired subtree is itself dropped.
#[derive(Debug, Default)]
pub struct DropReclaimer;

impl Reclaimer for DropReclaimer {
    fn retire(&self, old: Arc<Node>) {
        drop(old);
    }
}

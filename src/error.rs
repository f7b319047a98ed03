//! Error taxonomy for classifier mutations.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("decision path depth would exceed the maximum of {max}")]
    CapacityExceeded { max: usize },

    #[error("rule not found")]
    NotFound,

    #[error("misuse: {0}")]
    Misuse(&'static str),
}

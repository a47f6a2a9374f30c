//! Error type definition.

use thiserror::Error;

/// Error type for `hposim`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The identifier is neither a canonical, an alternate, nor a replaced obsolete term.
    #[error("unknown term: {0}")]
    UnknownTerm(String),
    /// The identifier refers to an obsolete term without replacement.
    #[error("obsolete term without replacement: {0}")]
    ObsoleteTerm(String),
    /// The ontology is structurally broken.
    #[error("ontology graph integrity violated: {0}")]
    GraphIntegrity(String),
    /// A null distribution was requested for an unsupported group size.
    #[error("invalid group size {size} for cohort of {cohort} probands")]
    InvalidGroupSize {
        /// The requested group size.
        size: usize,
        /// The number of probands in the cohort.
        cohort: usize,
    },
    /// The computation was interrupted via the stop flag.
    #[error("computation cancelled")]
    Cancelled,
}

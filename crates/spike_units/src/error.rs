//! Error types for the functional units

use spike_types::ShapeError;
use thiserror::Error;

/// Reasons a functional unit rejects its input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("unsupported array rank {rank} (expected {expected})")]
    UnsupportedRank { rank: usize, expected: &'static str },

    #[error("contact {contact} out of range for {n_contacts} contacts")]
    ContactOutOfRange { contact: usize, n_contacts: usize },

    #[error("empty input: {0}")]
    EmptyInput(String),

    #[error("row count mismatch: {left} rows vs {right} rows")]
    RowMismatch { left: usize, right: usize },

    #[error("bad param {0}")]
    BadParam(String),

    #[error("eigen decomposition did not converge after {0} sweeps")]
    NoConvergence(usize),

    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// Result type for functional units
pub type UnitResult<T> = Result<T, UnitError>;

//! Error handling for problem setup and file loading.
//!
//! Only setup can fail with an error. Everything that goes wrong once the SCP loop
//! runs (solver failures, infeasibility, divergence of shooting) is captured in the
//! solution records instead.

use std::io;
use thiserror::Error;

/// Unified error to report failures while building a trajectory optimization problem.
#[derive(Debug, Error)]
pub enum TrajoptError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse Error: {0}")]
    Parse(String),

    /// A zone has a non-positive extent, radius or a non-finite coordinate.
    #[error("Malformed zone data: {0}")]
    MalformedZoneData(String),

    #[error("Dimension mismatch in {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("Invalid discretization: {0}")]
    InvalidDiscretization(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl TrajoptError {
    pub(crate) fn dimension(what: &str, expected: usize, found: usize) -> Self {
        TrajoptError::DimensionMismatch {
            what: what.to_string(),
            expected,
            found,
        }
    }
}

/// Result type for problem setup.
pub type Result<T> = std::result::Result<T, TrajoptError>;

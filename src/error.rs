//! Error taxonomy for the SRLTP solver.
//!
//! Only `MalformedInstance` and I/O style failures ever reach callers of the
//! driver. Oracle failures and invariant violations are recorded in the run
//! trace and treated as failed iterations.

use crate::solution::Violation;
use std::fmt;

/// Errors raised by the library
#[derive(Debug)]
pub enum SrltpError {
    /// The instance violates a basic structural assumption (fatal to a run)
    MalformedInstance(String),
    /// The optimization oracle could not be reached (licence, environment)
    OracleUnavailable(String),
    /// The optimization oracle failed internally
    Oracle(String),
    /// A solution failed the independent feasibility check
    InvariantViolation(Vec<Violation>),
    /// File system error
    Io(std::io::Error),
    /// JSON / CSV decoding or encoding error
    Parse(String),
}

impl fmt::Display for SrltpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SrltpError::MalformedInstance(msg) => write!(f, "malformed instance: {}", msg),
            SrltpError::OracleUnavailable(msg) => write!(f, "oracle unavailable: {}", msg),
            SrltpError::Oracle(msg) => write!(f, "oracle error: {}", msg),
            SrltpError::InvariantViolation(violations) => {
                write!(f, "invariant violation ({} issues)", violations.len())?;
                for v in violations.iter().take(5) {
                    write!(f, "; {}", v)?;
                }
                Ok(())
            }
            SrltpError::Io(e) => write!(f, "I/O error: {}", e),
            SrltpError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for SrltpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SrltpError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SrltpError {
    fn from(e: std::io::Error) -> Self {
        SrltpError::Io(e)
    }
}

impl From<serde_json::Error> for SrltpError {
    fn from(e: serde_json::Error) -> Self {
        SrltpError::Parse(e.to_string())
    }
}

impl From<csv::Error> for SrltpError {
    fn from(e: csv::Error) -> Self {
        SrltpError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SrltpError>;

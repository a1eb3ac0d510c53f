use std::io;

use thiserror::Error;

/// Everything that can go wrong while parsing or evaluating a planning model.
#[derive(Debug, Error)]
pub enum PddlError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("arity mismatch for {symbol}: expected {expected}, found {found}")]
    ArityMismatch {
        symbol: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("referential integrity: {0}")]
    ReferentialIntegrity(String),
    #[error("stratification error: {0}")]
    Stratification(String),
}

/// Discriminant of [`PddlError`], for callers that branch on the failure
/// class without matching payloads.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    UnknownSymbol,
    ArityMismatch,
    InvalidArgument,
    InvalidTransition,
    ReferentialIntegrity,
    Stratification,
}

impl PddlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PddlError::Syntax(_) => ErrorKind::Syntax,
            PddlError::UnknownSymbol(_) => ErrorKind::UnknownSymbol,
            PddlError::ArityMismatch { .. } => ErrorKind::ArityMismatch,
            PddlError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            PddlError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            PddlError::ReferentialIntegrity(_) => ErrorKind::ReferentialIntegrity,
            PddlError::Stratification(_) => ErrorKind::Stratification,
        }
    }
}

// The s-expression layer reports malformed input through io::Error.
impl From<io::Error> for PddlError {
    fn from(e: io::Error) -> Self {
        PddlError::Syntax(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PddlError>;

use thiserror::Error;

/// Shape conflict between two operands of a linear-algebra operation.
///
/// Also used for out-of-range row/column requests, in which case `found` is
/// the offending index and `expected` the exclusive bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dimension mismatch in {context}: expected {expected}, found {found}")]
pub struct DimensionMismatch {
    pub context: &'static str,
    pub expected: usize,
    pub found: usize,
}

impl DimensionMismatch {
    pub fn new(context: &'static str, expected: usize, found: usize) -> Self {
        Self {
            context,
            expected,
            found,
        }
    }

    /// Returns `Ok(())` when `expected == found`.
    pub fn check(context: &'static str, expected: usize, found: usize) -> std::result::Result<(), Self> {
        if expected == found {
            Ok(())
        } else {
            Err(Self::new(context, expected, found))
        }
    }

    /// Returns `Ok(())` when `index < bound`.
    pub fn check_index(context: &'static str, bound: usize, index: usize) -> std::result::Result<(), Self> {
        if index < bound {
            Ok(())
        } else {
            Err(Self::new(context, bound, index))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
    #[error("solver diverged: {0}")]
    Divergence(String),
    #[error("numerical failure: {0}")]
    Numerical(String),
    #[error("sparsity {k} exceeds signal dimension {n}")]
    InvalidSparsity { k: usize, n: usize },
    #[error("invalid solver parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Debug, Error)]
pub enum CsError {
    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),
    #[error("unknown cluster {0}")]
    UnknownCluster(u8),
    #[error("expired sequence {sequence} (current {current})")]
    ExpiredSequence { sequence: u16, current: u16 },
    #[error("size mismatch for {what}: expected {expected}, found {found}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("solver error: {0}")]
    Solver(#[from] SolverError),
    #[error("sequence {sequence} timed out")]
    Timeout { sequence: u16 },
    #[error("invalid coefficient code {bits:#04b} at index {index}")]
    InvalidCoefficient { index: usize, bits: u8 },
    #[error("{op} not allowed in state {state}")]
    InvalidState { op: &'static str, state: &'static str },
    #[error("config error: {0}")]
    Config(String),
    #[error("wire format error: {0}")]
    Wire(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<&'static str> for CsError {
    fn from(s: &'static str) -> Self {
        CsError::Config(s.to_string())
    }
}

impl From<String> for CsError {
    fn from(s: String) -> Self {
        CsError::Config(s)
    }
}

pub type Result<T> = std::result::Result<T, CsError>;

/// Reason a packet was dropped at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DropCause {
    UnknownCluster,
    ExpiredSequence,
    SizeMismatch,
    InvalidState,
}

impl DropCause {
    /// Stable cause code written to the dropped-packet trace.
    pub fn code(&self) -> i32 {
        match self {
            DropCause::UnknownCluster => -1,
            DropCause::ExpiredSequence => -2,
            DropCause::SizeMismatch => -3,
            DropCause::InvalidState => -4,
        }
    }

    /// Maps an ingestion error onto its drop cause. Errors that are not
    /// recoverable drops return `None`.
    pub fn from_error(err: &CsError) -> Option<Self> {
        match err {
            CsError::UnknownCluster(_) => Some(DropCause::UnknownCluster),
            CsError::ExpiredSequence { .. } => Some(DropCause::ExpiredSequence),
            CsError::SizeMismatch { .. } | CsError::Dimension(_) => Some(DropCause::SizeMismatch),
            CsError::InvalidState { .. } => Some(DropCause::InvalidState),
            _ => None,
        }
    }
}

impl std::fmt::Display for DropCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DropCause::UnknownCluster => "unknown-cluster",
            DropCause::ExpiredSequence => "expired-sequence",
            DropCause::SizeMismatch => "size-mismatch",
            DropCause::InvalidState => "invalid-state",
        };
        f.write_str(s)
    }
}

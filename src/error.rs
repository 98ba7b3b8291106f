use core::fmt;

/// Errors surfaced by forest operations.
///
/// `InvalidConfig` and `InvalidInput` are reported at the API boundary and
/// leave the model untouched. `Invariant` signals a corrupted model; the
/// forest should be discarded once one is observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RcfError {
    InvalidConfig { msg: &'static str },
    InvalidInput { msg: &'static str },
    Invariant { msg: &'static str },
    CapacityExhausted,
}

impl fmt::Display for RcfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RcfError::InvalidConfig { msg } => write!(f, "invalid configuration: {}", msg),
            RcfError::InvalidInput { msg } => write!(f, "invalid input: {}", msg),
            RcfError::Invariant { msg } => write!(f, "invariant violation: {}", msg),
            RcfError::CapacityExhausted => write!(f, "point store capacity exhausted"),
        }
    }
}

impl std::error::Error for RcfError {}

pub type Result<T> = core::result::Result<T, RcfError>;

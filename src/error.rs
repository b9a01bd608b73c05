use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used across the parameter server crate.
pub type Result<T> = std::result::Result<T, PsErr>;

/// Validation failures surfaced at the server API boundary.
///
/// Every variant is local to the offending call: the server never retries a
/// failed operation and never mutates master state before validation passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PsErr {
    /// The worker id is outside the configured `0..workers` range.
    InvalidWorker { got: usize, workers: usize },
    /// A gradient or weight set disagrees with the master on the name set or
    /// on a tensor shape. An empty `got` shape means the name is absent on
    /// the caller's side; an empty `expected` shape means the master doesn't
    /// know the name.
    ShapeMismatch {
        name: String,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    /// A restored snapshot doesn't match the configured model or topology.
    IncompatibleState { reason: String },
}

impl Display for PsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PsErr::InvalidWorker { got, workers } => {
                write!(f, "invalid worker id {got}, server has {workers} workers")
            }
            PsErr::ShapeMismatch {
                name,
                got,
                expected,
            } => match (got.is_empty(), expected.is_empty()) {
                (true, _) => write!(f, "parameter {name} is missing from the provided set"),
                (_, true) => write!(f, "parameter {name} is unknown to the master"),
                _ => write!(
                    f,
                    "shape mismatch for parameter {name}: got {got:?}, expected {expected:?}"
                ),
            },
            PsErr::IncompatibleState { reason } => {
                write!(f, "incompatible server state: {reason}")
            }
        }
    }
}

impl Error for PsErr {}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("clique label of length {got} does not fit a window of {expected_len}")]
    InvalidCliqueLabel { expected_len: usize, got: usize },
    #[error("label {label} out of range (num classes: {num_classes})")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("unknown label: {0}")]
    UnknownLabel(String),
    #[error("got NaN log-likelihood for document {doc}; this may indicate numeric underflow from an overly long document")]
    NumericUnderflow { doc: usize },
    #[error("unknown prior type: {0}")]
    UnknownPrior(String),
    #[error("unknown potential function: {0}")]
    UnknownPotential(String),
    #[error("unknown annealing type: {0}")]
    UnknownAnnealing(String),
    #[error("unknown sampling style: {0}")]
    UnknownSamplingStyle(String),
    #[error("invalid alignment link: {0}")]
    InvalidAlignment(String),
    #[error("empty document")]
    EmptyDocument,
    #[error("sequence model has no positions")]
    EmptyModel,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

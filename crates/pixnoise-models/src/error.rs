//! Model validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Invalid perturb_prob {0}: must be between 0 and 1")]
    InvalidProbability(f64),

    #[error("Invalid boolean value: {0}")]
    InvalidBool(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),
}

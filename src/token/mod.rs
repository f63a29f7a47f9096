//! Token counting utilities.

pub mod estimator;

pub use estimator::{TokenEstimator, TokenizerError};

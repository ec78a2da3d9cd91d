//! Error types for controller configuration.

use thiserror::Error;

/// Result type for controller operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors raised while validating controller parameters.
///
/// Compute paths never return these; bad readings produce a neutral output.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    /// Invalid argument provided to a controller.
    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// Parameter outside its allowed range.
    #[error("Parameter {name} out of range: {value}")]
    OutOfRange { name: &'static str, value: f64 },
}

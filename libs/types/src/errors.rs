//! Error types shared by chart services
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Identifier construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Chain id must not be empty")]
    EmptyChainId,

    #[error("Address must not be empty")]
    EmptyAddress,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Numeric input errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    #[error("Not a number: {0}")]
    NotANumber(String),

    #[error("Negative value not allowed: {0}")]
    Negative(String),

    #[error("Value out of range: {0}")]
    Overflow(String),

    #[error("Unsupported decimals: {0}")]
    UnsupportedDecimals(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_error_display() {
        let err = NumericError::Negative("-1.5".to_string());
        assert_eq!(err.to_string(), "Negative value not allowed: -1.5");
    }

    #[test]
    fn test_id_error_display() {
        let err = IdError::InvalidAddress("0x 12".to_string());
        assert!(err.to_string().contains("0x 12"));
    }
}

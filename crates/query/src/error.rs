use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Raised only when no usable attribute was recognized.
    #[error("vehicle attributes are empty; nothing to search for")]
    InvalidAttributes,
    #[error("invalid synthesizer config: {0}")]
    InvalidConfig(String),
}

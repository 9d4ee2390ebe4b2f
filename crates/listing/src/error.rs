use thiserror::Error;

/// Errors raised while constructing listing values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListingError {
    #[error("source identifier must not be empty")]
    EmptySource,
    #[error("invalid source identifier: {0}")]
    InvalidSource(String),
    #[error("invalid listing url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("listing title must not be empty")]
    EmptyTitle,
    #[error("embedding must not be empty")]
    EmptyEmbedding,
    #[error("embedding contains a non-finite value at position {0}")]
    NonFiniteEmbedding(usize),
}

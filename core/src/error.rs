use thiserror::Error;

#[derive(Debug, Error)]
pub enum VeilmarkError {
    #[error("Permutation requested for an empty domain (n = 0)")]
    EmptyDomain,

    #[error("Permutation length mismatch: expected {expected}, got {actual}")]
    PermutationLengthMismatch { expected: usize, actual: usize },

    #[error("Corrupt or invalid key: {0}")]
    CorruptOrInvalidKey(String),

    #[error("Audio decode failure: {0}")]
    AudioDecodeFailure(String),

    #[error("Input exceeds size limit: {actual} > {limit}")]
    OversizeInput { actual: usize, limit: usize },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Insufficient credit for requested operation")]
    InsufficientCredit,

    #[error("Collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
}

pub type Result<T> = std::result::Result<T, VeilmarkError>;

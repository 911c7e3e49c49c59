use std::fmt;

/// Which cryptographic check rejected the server's data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofKind {
    /// Sparse Merkle audit path did not reconstruct the map root.
    MapInclusion,
    /// Log inclusion proof did not reconstruct the log root.
    LogInclusion,
    /// Log consistency proof did not link the two log heads.
    LogConsistency,
}

impl fmt::Display for ProofKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofKind::MapInclusion => f.write_str("map inclusion"),
            ProofKind::LogInclusion => f.write_str("log inclusion"),
            ProofKind::LogConsistency => f.write_str("log consistency"),
        }
    }
}

/// Errors returned by the verifiable map client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body or proof metadata could not be parsed.
    #[error("decode error: {0}")]
    Decode(String),

    /// A proof returned by the server failed verification.
    #[error("{0} proof verification failed")]
    VerificationFailed(ProofKind),

    #[error("object not found")]
    NotFound,

    #[error("not authorized")]
    NotAuthorized,

    /// The requested tree size is not available on the server.
    #[error("invalid tree size range")]
    InvalidRange,

    /// The previous-leaf precondition of an update did not hold.
    #[error("object conflict")]
    ObjectConflict,

    /// Any other non-success HTTP status.
    #[error("unexpected status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// True for failures that mean the server contradicted itself or what we
    /// trusted before. These must never be retried.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, Error::VerificationFailed(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Self::Decode(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from constructing or parsing value types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypeError {
    /// The algorithm token is not one of the supported set.
    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    /// A raw digest had the wrong length for its algorithm.
    #[error("bad digest length for {algorithm}: expected {expected}, got {actual}")]
    BadDigestLength {
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A `ni:` URI failed to parse.
    #[error("malformed ni URI: {0}")]
    MalformedUri(String),

    /// A token failed its grammar in strict mode.
    #[error("invalid {kind} token: {value:?}")]
    InvalidToken { kind: &'static str, value: String },
}

/// Result alias for type construction.
pub type TypeResult<T> = Result<T, TypeError>;

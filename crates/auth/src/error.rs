use thiserror::Error;

/// Gate-level failures. Both map to a 4xx at the transport boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing or invalid identity (401).
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Check denied or could not be evaluated (403).
    #[error("forbidden: {0}")]
    Authorization(String),
}

impl AuthError {
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn http_status(&self) -> u16 {
        match self {
            AuthError::Authentication(_) => 401,
            AuthError::Authorization(_) => 403,
        }
    }
}

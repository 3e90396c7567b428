use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims handed over by the transport layer once a token has been decoded
/// and verified.
///
/// Identifiers stay raw strings here: a missing or unparsable `sub` /
/// `tenant_id` is an authentication failure, decided by
/// [`RequestContext::from_claims`](crate::RequestContext::from_claims).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthClaims {
    #[serde(default)]
    pub sub: Option<String>,

    #[serde(default)]
    pub tenant_id: Option<String>,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate the claims' time window against `now`.
///
/// Signature verification happens upstream.
pub fn validate_claims(claims: &AuthClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

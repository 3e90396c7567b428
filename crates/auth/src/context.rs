use chrono::{DateTime, Utc};

use adminhub_core::{TenantId, UserId};

use crate::{AuthClaims, AuthError, Subject, validate_claims};

/// Authenticated caller identity.
///
/// The tenant here is the only tenant a request may act in; payload-supplied
/// tenant ids are never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestContext {
    pub user_id: UserId,
    pub tenant_id: TenantId,
}

impl RequestContext {
    pub fn new(user_id: UserId, tenant_id: TenantId) -> Self {
        Self { user_id, tenant_id }
    }

    /// Resolve the caller from transport claims.
    pub fn from_claims(claims: &AuthClaims, now: DateTime<Utc>) -> Result<Self, AuthError> {
        validate_claims(claims, now).map_err(|e| AuthError::authentication(e.to_string()))?;

        let sub = claims
            .sub
            .as_deref()
            .ok_or_else(|| AuthError::authentication("missing subject"))?;
        let tenant = claims
            .tenant_id
            .as_deref()
            .ok_or_else(|| AuthError::authentication("missing tenant"))?;

        let user_id =
            UserId::parse_non_nil(sub).map_err(|e| AuthError::authentication(e.to_string()))?;
        let tenant_id =
            TenantId::parse_non_nil(tenant).map_err(|e| AuthError::authentication(e.to_string()))?;

        Ok(Self::new(user_id, tenant_id))
    }

    pub fn subject(&self) -> Subject {
        Subject::user(self.user_id)
    }
}

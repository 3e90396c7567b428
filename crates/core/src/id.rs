//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a tenant (isolation boundary for every entity and query).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

/// Identifier of an authenticated user (the subject of authorization checks).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of an aggregate root (projects, workflow instances keyed by them, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new time-ordered (UUIDv7) identifier.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Parse an identifier coming from an untrusted boundary.
            ///
            /// Rejects blank input and the nil UUID, which transports tend to
            /// produce for "absent" values.
            pub fn parse_non_nil(raw: &str) -> Result<Self, DomainError> {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(DomainError::invalid_id(format!("{}: empty", $name)));
                }
                let id: Self = trimmed.parse()?;
                if id.0.is_nil() {
                    return Err(DomainError::invalid_id(format!("{}: nil uuid", $name)));
                }
                Ok(id)
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(TenantId, "TenantId");
impl_uuid_newtype!(UserId, "UserId");
impl_uuid_newtype!(AggregateId, "AggregateId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_non_nil_rejects_blank_and_nil() {
        assert!(TenantId::parse_non_nil("").is_err());
        assert!(TenantId::parse_non_nil("   ").is_err());
        assert!(TenantId::parse_non_nil(&Uuid::nil().to_string()).is_err());
        assert!(UserId::parse_non_nil("not-a-uuid").is_err());
    }

    #[test]
    fn parse_non_nil_accepts_padded_uuid() {
        let id = UserId::new();
        let parsed = UserId::parse_non_nil(&format!(" {id} ")).unwrap();
        assert_eq!(parsed, id);
    }
}

use adminhub_core::TenantId;

use crate::EventEnvelope;

/// Messages that belong to exactly one tenant.
///
/// Lets workers pinned to a tenant drop foreign messages without decoding
/// the payload.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use adminhub_core::{AggregateId, TenantId};

use crate::Event;

/// Envelope for an event with tenant + routing metadata.
///
/// This is the unit written to the outbox and delivered to handlers.
/// `event_id` is stable across redeliveries, so consumers can deduplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    event_type: String,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed domain event, serializing its payload to JSON.
    pub fn from_event<E>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self::new(
            Uuid::now_v7(),
            tenant_id,
            aggregate_id,
            aggregate_type,
            event.event_type(),
            event.occurred_at(),
            serde_json::to_value(event)?,
        ))
    }

    /// Deserialize the payload back into a typed event.
    pub fn decode<E>(&self) -> Result<E, serde_json::Error>
    where
        E: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        at: DateTime<Utc>,
        note: String,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn from_event_copies_metadata_and_decodes_back() {
        let ev = Pinged {
            at: Utc::now(),
            note: "hello".to_string(),
        };
        let tenant = TenantId::new();
        let agg = AggregateId::new();

        let env = EventEnvelope::from_event(tenant, agg, "test.thing", &ev).unwrap();

        assert_eq!(env.tenant_id(), tenant);
        assert_eq!(env.aggregate_id(), agg);
        assert_eq!(env.event_type(), "test.pinged");
        assert_eq!(env.occurred_at(), ev.at);
        assert_eq!(env.decode::<Pinged>().unwrap(), ev);
    }
}

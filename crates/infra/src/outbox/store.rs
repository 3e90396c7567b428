use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use adminhub_core::{AggregateId, TenantId};
use adminhub_events::{Event, EventEnvelope};

/// Unit carried through the outbox.
pub type OutboxMessage = EventEnvelope<JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Delivered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub message: OutboxMessage,
    pub status: OutboxStatus,
    /// Failed delivery attempts so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(message: OutboxMessage) -> Self {
        let now = Utc::now();
        Self {
            message,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            next_attempt_at: now,
            created_at: now,
            delivered_at: None,
        }
    }

    /// Serialize a domain event into a pending record.
    pub fn from_event<E>(
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        event: &E,
    ) -> Result<Self, OutboxError>
    where
        E: Event + Serialize,
    {
        let message = EventEnvelope::from_event(tenant_id, aggregate_id, aggregate_type, event)
            .map_err(|e| OutboxError::Serialization(e.to_string()))?;
        Ok(Self::new(message))
    }

    pub fn id(&self) -> Uuid {
        self.message.event_id()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutboxError {
    #[error("outbox record already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("outbox record not found: {0}")]
    NotFound(Uuid),

    #[error("outbox serialization failed: {0}")]
    Serialization(String),

    #[error("outbox storage error: {0}")]
    Storage(String),
}

/// Durable outbox.
///
/// `append` returns only once the record is stored. Records are fetched in
/// append order, so per-aggregate ordering is preserved by the relay.
pub trait OutboxStore: Send + Sync {
    fn append(&self, record: OutboxRecord) -> Result<(), OutboxError>;

    /// Pending records whose `next_attempt_at <= now`, oldest first.
    ///
    /// A due record is withheld while an older pending record of the same
    /// aggregate is still waiting out its backoff.
    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError>;

    fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError>;

    fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>, OutboxError>;

    fn pending_count(&self) -> Result<usize, OutboxError>;

    /// Drop delivered records acknowledged at or before `before`. Returns how many
    /// were removed.
    fn purge_delivered(&self, before: DateTime<Utc>) -> Result<usize, OutboxError>;
}

impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    fn append(&self, record: OutboxRecord) -> Result<(), OutboxError> {
        (**self).append(record)
    }

    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
        (**self).fetch_due(now, limit)
    }

    fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        (**self).mark_delivered(id, at)
    }

    fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        (**self).mark_failed(id, error, next_attempt_at)
    }

    fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>, OutboxError> {
        (**self).get(id)
    }

    fn pending_count(&self) -> Result<usize, OutboxError> {
        (**self).pending_count()
    }

    fn purge_delivered(&self, before: DateTime<Utc>) -> Result<usize, OutboxError> {
        (**self).purge_delivered(before)
    }
}

/// In-memory outbox for tests/dev. Keeps append order in a `Vec`.
#[derive(Debug, Default)]
pub struct InMemoryOutbox {
    records: RwLock<Vec<OutboxRecord>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every retained record, in append order.
    pub fn all(&self) -> Vec<OutboxRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Retained records, delivered ones included until purged.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> OutboxError {
        OutboxError::Storage("lock poisoned".to_string())
    }

    fn update<F>(&self, id: Uuid, f: F) -> Result<(), OutboxError>
    where
        F: FnOnce(&mut OutboxRecord),
    {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let record = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(OutboxError::NotFound(id))?;
        f(record);
        Ok(())
    }
}

impl OutboxStore for InMemoryOutbox {
    fn append(&self, record: OutboxRecord) -> Result<(), OutboxError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        if records.iter().any(|r| r.id() == record.id()) {
            return Err(OutboxError::AlreadyExists(record.id()));
        }
        records.push(record);
        Ok(())
    }

    fn fetch_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        let mut waiting: HashSet<AggregateId> = HashSet::new();
        let mut due = Vec::new();

        for record in records.iter().filter(|r| r.status == OutboxStatus::Pending) {
            if due.len() >= limit {
                break;
            }
            let aggregate_id = record.message.aggregate_id();
            if waiting.contains(&aggregate_id) {
                continue;
            }
            if record.is_due(now) {
                due.push(record.clone());
            } else {
                waiting.insert(aggregate_id);
            }
        }
        Ok(due)
    }

    fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        self.update(id, |r| {
            r.status = OutboxStatus::Delivered;
            r.delivered_at = Some(at);
            r.last_error = None;
        })
    }

    fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        self.update(id, |r| {
            r.attempts += 1;
            r.last_error = Some(error);
            r.next_attempt_at = next_attempt_at;
        })
    }

    fn get(&self, id: Uuid) -> Result<Option<OutboxRecord>, OutboxError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.iter().find(|r| r.id() == id).cloned())
    }

    fn pending_count(&self) -> Result<usize, OutboxError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending)
            .count())
    }

    fn purge_delivered(&self, before: DateTime<Utc>) -> Result<usize, OutboxError> {
        let mut records = self.records.write().map_err(|_| Self::poisoned())?;
        let retained = records.len();
        records.retain(|r| {
            r.status == OutboxStatus::Pending || r.delivered_at.is_some_and(|at| at > before)
        });
        Ok(retained - records.len())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record() -> OutboxRecord {
        record_for(AggregateId::new())
    }

    fn record_for(aggregate_id: AggregateId) -> OutboxRecord {
        OutboxRecord::new(EventEnvelope::new(
            Uuid::now_v7(),
            TenantId::new(),
            aggregate_id,
            "project",
            "project.created",
            Utc::now(),
            serde_json::json!({}),
        ))
    }

    #[test]
    fn fetch_due_respects_order_and_backoff() {
        let outbox = InMemoryOutbox::new();
        let first = record();
        let second = record();
        outbox.append(first.clone()).unwrap();
        outbox.append(second.clone()).unwrap();

        let now = Utc::now();
        let due = outbox.fetch_due(now, 10).unwrap();
        assert_eq!(
            due.iter().map(OutboxRecord::id).collect::<Vec<_>>(),
            vec![first.id(), second.id()]
        );

        outbox
            .mark_failed(first.id(), "nope".to_string(), now + Duration::seconds(30))
            .unwrap();
        let due = outbox.fetch_due(now, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id(), second.id());

        let retried = outbox.get(first.id()).unwrap().unwrap();
        assert_eq!(retried.attempts, 1);
        assert_eq!(retried.last_error.as_deref(), Some("nope"));
    }

    #[test]
    fn delivered_records_are_not_fetched() {
        let outbox = InMemoryOutbox::new();
        let r = record();
        outbox.append(r.clone()).unwrap();

        outbox.mark_delivered(r.id(), Utc::now()).unwrap();

        assert!(outbox.fetch_due(Utc::now(), 10).unwrap().is_empty());
        assert_eq!(outbox.pending_count().unwrap(), 0);
    }

    #[test]
    fn duplicate_append_is_rejected() {
        let outbox = InMemoryOutbox::new();
        let r = record();
        outbox.append(r.clone()).unwrap();
        assert_eq!(outbox.append(r.clone()), Err(OutboxError::AlreadyExists(r.id())));
    }

    #[test]
    fn backed_off_record_holds_back_its_aggregate() {
        let outbox = InMemoryOutbox::new();
        let agg = AggregateId::new();
        let first = record_for(agg);
        let second = record_for(agg);
        let unrelated = record();
        outbox.append(first.clone()).unwrap();
        outbox.append(second.clone()).unwrap();
        outbox.append(unrelated.clone()).unwrap();

        let now = Utc::now();
        outbox
            .mark_failed(first.id(), "down".to_string(), now + Duration::seconds(30))
            .unwrap();

        let due = outbox.fetch_due(now, 10).unwrap();
        assert_eq!(due.iter().map(OutboxRecord::id).collect::<Vec<_>>(), vec![unrelated.id()]);

        let later = now + Duration::seconds(31);
        let due = outbox.fetch_due(later, 10).unwrap();
        assert_eq!(
            due.iter().map(OutboxRecord::id).collect::<Vec<_>>(),
            vec![first.id(), second.id()]
        );
    }

    #[test]
    fn purge_drops_only_old_delivered_records() {
        let outbox = InMemoryOutbox::new();
        let old = record();
        let recent = record();
        let pending = record();
        for r in [&old, &recent, &pending] {
            outbox.append(r.clone()).unwrap();
        }

        let now = Utc::now();
        outbox.mark_delivered(old.id(), now - Duration::hours(2)).unwrap();
        outbox.mark_delivered(recent.id(), now).unwrap();

        assert_eq!(outbox.purge_delivered(now - Duration::hours(1)).unwrap(), 1);
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.get(old.id()).unwrap(), None);
        assert!(outbox.get(recent.id()).unwrap().is_some());
        assert_eq!(outbox.pending_count().unwrap(), 1);
    }
}

//! Outbox relay: at-least-once delivery of outbox records.

use std::collections::HashSet;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use adminhub_core::AggregateId;

use super::store::{OutboxError, OutboxMessage, OutboxRecord, OutboxStore};
use crate::retry::RetryPolicy;

/// Handler failure; the record stays pending and is retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Consumer of outbox messages. Must be idempotent: a message can be seen
/// more than once.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError>;
}

impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler + ?Sized,
{
    fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError> {
        (**self).handle(message)
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub name: String,
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Redelivery backoff; the attempt limit is ignored.
    pub backoff: RetryPolicy,
    /// How long delivered records are kept before the relay purges them.
    pub retain_delivered: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: "outbox-relay".to_string(),
            poll_interval: Duration::from_millis(100),
            batch_size: 64,
            backoff: RetryPolicy::unbounded(Duration::from_secs(1), Duration::from_secs(60)),
            retain_delivered: Duration::from_secs(3600),
        }
    }
}

impl RelayConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = RetryPolicy::unbounded(initial, max);
        self
    }

    pub fn with_retention(mut self, retain_delivered: Duration) -> Self {
        self.retain_delivered = retain_delivered;
        self
    }
}

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub delivered: usize,
    pub failed: usize,
    /// Left pending because an earlier record of the same aggregate failed.
    pub deferred: usize,
}

type BoxedHandler = Box<dyn MessageHandler>;

/// Delivers pending outbox records to handlers registered by event type.
///
/// A record is marked delivered only once every matching handler returned
/// `Ok`. Failures are rescheduled with capped exponential backoff, with no
/// attempt limit.
pub struct OutboxRelay<S: OutboxStore> {
    store: S,
    handlers: Vec<(String, BoxedHandler)>,
    config: RelayConfig,
}

impl<S: OutboxStore + 'static> OutboxRelay<S> {
    pub fn new(store: S, config: RelayConfig) -> Self {
        Self {
            store,
            handlers: Vec::new(),
            config,
        }
    }

    /// Register a handler for an event type, a category (`"project.*"`) or
    /// everything (`"*"`).
    pub fn register_handler<H>(&mut self, pattern: impl Into<String>, handler: H)
    where
        H: MessageHandler + 'static,
    {
        self.handlers.push((pattern.into(), Box::new(handler)));
    }

    fn handlers_for<'a>(&'a self, event_type: &'a str) -> impl Iterator<Item = &'a BoxedHandler> + 'a {
        self.handlers
            .iter()
            .filter(move |(pattern, _)| pattern_matches(pattern, event_type))
            .map(|(_, handler)| handler)
    }

    /// One pass over due records.
    pub fn drain_once(&self) -> Result<DrainStats, OutboxError> {
        let now = Utc::now();
        let due = self.store.fetch_due(now, self.config.batch_size)?;
        let mut stats = DrainStats::default();
        let mut blocked: HashSet<AggregateId> = HashSet::new();

        for record in due {
            let aggregate_id = record.message.aggregate_id();
            if blocked.contains(&aggregate_id) {
                stats.deferred += 1;
                continue;
            }

            match self.deliver(&record) {
                Ok(()) => {
                    self.store.mark_delivered(record.id(), Utc::now())?;
                    stats.delivered += 1;
                    debug!(
                        relay = %self.config.name,
                        event_id = %record.id(),
                        event_type = %record.message.event_type(),
                        "outbox record delivered"
                    );
                }
                Err(err) => {
                    let attempt = record.attempts + 1;
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    let next = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
                    self.store.mark_failed(record.id(), err.to_string(), next)?;
                    blocked.insert(aggregate_id);
                    stats.failed += 1;
                    warn!(
                        relay = %self.config.name,
                        event_id = %record.id(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "outbox delivery failed"
                    );
                }
            }
        }

        Ok(stats)
    }

    /// Drop delivered records older than the retention window.
    pub fn purge_delivered(&self) -> Result<usize, OutboxError> {
        let retention = chrono::Duration::from_std(self.config.retain_delivered)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let purged = self.store.purge_delivered(cutoff)?;
        if purged > 0 {
            debug!(relay = %self.config.name, purged, "delivered outbox records purged");
        }
        Ok(purged)
    }

    fn deliver(&self, record: &OutboxRecord) -> Result<(), HandlerError> {
        let mut matched = false;
        for handler in self.handlers_for(record.message.event_type()) {
            matched = true;
            handler.handle(&record.message)?;
        }
        if !matched {
            warn!(
                relay = %self.config.name,
                event_type = %record.message.event_type(),
                "no handler registered; acknowledging"
            );
        }
        Ok(())
    }

    /// Run the relay on a background thread until shut down.
    pub fn spawn(self) -> std::io::Result<RelayHandle>
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || relay_loop(self, shutdown_rx))?;

        Ok(RelayHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn pattern_matches(pattern: &str, event_type: &str) -> bool {
    if pattern == "*" || pattern == event_type {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(prefix) => event_type
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.')),
        None => false,
    }
}

fn relay_loop<S: OutboxStore + 'static>(relay: OutboxRelay<S>, shutdown_rx: mpsc::Receiver<()>) {
    info!(relay = %relay.config.name, "outbox relay started");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let idle = match relay.drain_once() {
            Ok(stats) => stats.delivered == 0,
            Err(e) => {
                error!(relay = %relay.config.name, error = %e, "outbox relay pass failed");
                true
            }
        };

        if idle {
            if let Err(e) = relay.purge_delivered() {
                warn!(relay = %relay.config.name, error = %e, "outbox purge failed");
            }
            match shutdown_rx.recv_timeout(relay.config.poll_interval) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        }
    }

    info!(relay = %relay.config.name, "outbox relay stopped");
}

/// Handle to stop and join a running relay.
#[derive(Debug)]
pub struct RelayHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl RelayHandle {
    /// Request graceful shutdown and wait for the relay thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use adminhub_core::TenantId;
    use uuid::Uuid;

    use super::*;
    use crate::outbox::{InMemoryOutbox, OutboxStatus};

    fn message(aggregate_id: AggregateId, event_type: &str) -> OutboxMessage {
        OutboxMessage::new(
            Uuid::now_v7(),
            TenantId::new(),
            aggregate_id,
            "project",
            event_type,
            Utc::now(),
            serde_json::json!({}),
        )
    }

    /// Fails the first `failures` calls, then acknowledges.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<Uuid>>,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl MessageHandler for Flaky {
        fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(HandlerError::new("transient"));
            }
            self.seen.lock().unwrap().push(message.event_id());
            Ok(())
        }
    }

    fn fast_config() -> RelayConfig {
        RelayConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_backoff(Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn record_stays_pending_until_acknowledged() {
        let outbox = InMemoryOutbox::arc();
        let handler = Arc::new(Flaky::new(2));
        let mut relay = OutboxRelay::new(outbox.clone(), fast_config());
        relay.register_handler("project.created", handler.clone());

        let msg = message(AggregateId::new(), "project.created");
        outbox.append(OutboxRecord::new(msg.clone())).unwrap();

        assert_eq!(relay.drain_once().unwrap().failed, 1);
        assert_eq!(relay.drain_once().unwrap().failed, 1);
        assert_eq!(outbox.pending_count().unwrap(), 1);

        assert_eq!(relay.drain_once().unwrap().delivered, 1);
        let stored = outbox.get(msg.event_id()).unwrap().unwrap();
        assert_eq!(stored.status, OutboxStatus::Delivered);
        assert_eq!(stored.attempts, 2);
        assert_eq!(*handler.seen.lock().unwrap(), vec![msg.event_id()]);
    }

    #[test]
    fn failure_defers_later_records_of_same_aggregate() {
        let outbox = InMemoryOutbox::arc();
        let handler = Arc::new(Flaky::new(1));
        let mut relay = OutboxRelay::new(outbox.clone(), fast_config());
        relay.register_handler("*", handler.clone());

        let agg = AggregateId::new();
        let first = message(agg, "project.created");
        let second = message(agg, "project.updated");
        outbox.append(OutboxRecord::new(first.clone())).unwrap();
        outbox.append(OutboxRecord::new(second.clone())).unwrap();

        let stats = relay.drain_once().unwrap();
        assert_eq!((stats.failed, stats.deferred), (1, 1));

        let stats = relay.drain_once().unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(
            *handler.seen.lock().unwrap(),
            vec![first.event_id(), second.event_id()]
        );
    }

    #[test]
    fn unmatched_records_are_acknowledged() {
        let outbox = InMemoryOutbox::arc();
        let handler = Arc::new(Flaky::new(0));
        let mut relay = OutboxRelay::new(outbox.clone(), fast_config());
        relay.register_handler("project.*", handler.clone());

        outbox
            .append(OutboxRecord::new(message(AggregateId::new(), "invoice.issued")))
            .unwrap();

        assert_eq!(relay.drain_once().unwrap().delivered, 1);
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn category_patterns() {
        assert!(pattern_matches("*", "project.created"));
        assert!(pattern_matches("project.*", "project.created"));
        assert!(!pattern_matches("project.*", "projects.created"));
        assert!(!pattern_matches("project.created", "project.deleted"));
    }

    #[test]
    fn spawned_relay_delivers_and_shuts_down() {
        let outbox = InMemoryOutbox::arc();
        let handler = Arc::new(Flaky::new(0));
        let mut relay = OutboxRelay::new(outbox.clone(), fast_config());
        relay.register_handler("*", handler.clone());
        let handle = relay.spawn().unwrap();

        outbox
            .append(OutboxRecord::new(message(AggregateId::new(), "project.created")))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while outbox.pending_count().unwrap() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        assert_eq!(outbox.pending_count().unwrap(), 0);
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn backed_off_record_keeps_later_records_waiting() {
        let outbox = InMemoryOutbox::arc();
        let handler = Arc::new(Flaky::new(1));
        let config = fast_config().with_backoff(Duration::from_secs(30), Duration::from_secs(30));
        let mut relay = OutboxRelay::new(outbox.clone(), config);
        relay.register_handler("*", handler.clone());

        let agg = AggregateId::new();
        let first = message(agg, "project.created");
        let second = message(agg, "project.updated");
        outbox.append(OutboxRecord::new(first.clone())).unwrap();
        outbox.append(OutboxRecord::new(second.clone())).unwrap();

        let stats = relay.drain_once().unwrap();
        assert_eq!((stats.failed, stats.deferred), (1, 1));

        // The first record is backing off; the second must not overtake it.
        let stats = relay.drain_once().unwrap();
        assert_eq!(stats, DrainStats::default());
        assert!(handler.seen.lock().unwrap().is_empty());
        assert_eq!(outbox.pending_count().unwrap(), 2);
    }

    #[test]
    fn delivered_records_are_purged_after_retention() {
        let outbox = InMemoryOutbox::arc();
        let handler = Arc::new(Flaky::new(0));
        let mut relay = OutboxRelay::new(outbox.clone(), fast_config().with_retention(Duration::ZERO));
        relay.register_handler("*", handler.clone());

        for _ in 0..100 {
            outbox
                .append(OutboxRecord::new(message(AggregateId::new(), "project.created")))
                .unwrap();
        }
        while relay.drain_once().unwrap().delivered > 0 {}

        assert_eq!(outbox.pending_count().unwrap(), 0);
        assert_eq!(relay.purge_delivered().unwrap(), 100);
        assert!(outbox.is_empty());
        assert_eq!(handler.seen.lock().unwrap().len(), 100);
    }

    #[test]
    fn default_retention_keeps_fresh_deliveries() {
        let outbox = InMemoryOutbox::arc();
        let relay = OutboxRelay::new(outbox.clone(), fast_config());
        outbox
            .append(OutboxRecord::new(message(AggregateId::new(), "project.created")))
            .unwrap();

        assert_eq!(relay.drain_once().unwrap().delivered, 1);
        assert_eq!(relay.purge_delivered().unwrap(), 0);
        assert_eq!(outbox.len(), 1);
    }
}

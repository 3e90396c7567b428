use adminhub_events::EventBus;

use super::relay::{HandlerError, MessageHandler};
use super::store::OutboxMessage;

/// Republishes outbox messages on an in-process bus.
///
/// The bus is fire-and-forget; the outbox stays the source of truth.
#[derive(Debug)]
pub struct BusForwarder<B> {
    bus: B,
}

impl<B> BusForwarder<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> MessageHandler for BusForwarder<B>
where
    B: EventBus<OutboxMessage>,
{
    fn handle(&self, message: &OutboxMessage) -> Result<(), HandlerError> {
        self.bus
            .publish(message.clone())
            .map_err(|e| HandlerError::new(format!("bus publish failed: {e:?}")))
    }
}

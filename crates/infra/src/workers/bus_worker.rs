use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use adminhub_core::TenantId;
use adminhub_events::{EventBus, Subscription, TenantScoped};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic bus subscriber loop.
///
/// - Subscribes to an event bus before the thread starts (no missed messages)
/// - Applies an idempotent handler for each message
/// - Optional tenant pinning: other tenants' messages are skipped
/// - Handler errors are logged; the worker keeps going
#[derive(Debug)]
pub struct BusWorker;

impl BusWorker {
    pub fn spawn<M, B, H, E>(
        name: impl Into<String>,
        bus: &B,
        tenant_id: Option<TenantId>,
        mut handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        M: TenantScoped + Send + 'static,
        B: EventBus<M>,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: core::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub: Subscription<M> = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&name, sub, shutdown_rx, tenant_id, &mut handler))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    tenant_id: Option<TenantId>,
    handler: &mut H,
) where
    M: TenantScoped,
    H: FnMut(M) -> Result<(), E>,
    E: core::fmt::Display,
{
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(msg) => {
                if tenant_id.is_some_and(|t| msg.tenant_id() != t) {
                    continue;
                }

                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = %err, "bus worker handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "bus worker stopped");
}

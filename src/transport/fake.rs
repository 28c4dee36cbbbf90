//! Scripted in-memory transport for exercising the queue and the session
//! state machine without radio hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use crate::error::{Error, Result};
use crate::operation::GattRequest;
use crate::transport::{DisconnectReason, ServiceDiscovery, Transport, TransportEvent};

/// Scripted behavior for one `execute` call.
pub(crate) enum Script {
    Respond(Result<Vec<u8>>),
    /// Never resolve until `abort_hung_executes` is called.
    Hang,
}

impl Script {
    pub(crate) fn ok(payload: Vec<u8>) -> Self {
        Self::Respond(Ok(payload))
    }

    pub(crate) fn err(error: Error) -> Self {
        Self::Respond(Err(error))
    }

    pub(crate) fn hang() -> Self {
        Self::Hang
    }
}

/// A transport whose every response is scripted by the test.
///
/// Responses are consumed in FIFO order; unscripted calls succeed with
/// empty/default results. All calls are recorded for assertions.
pub(crate) struct FakeTransport {
    execute_scripts: Mutex<VecDeque<Script>>,
    connect_results: Mutex<VecDeque<Result<()>>>,
    discovery_results: Mutex<VecDeque<Result<ServiceDiscovery>>>,
    bond_results: Mutex<VecDeque<Result<()>>>,
    executed: Mutex<Vec<GattRequest>>,
    connect_flags: Mutex<Vec<bool>>,
    disconnects: AtomicUsize,
    bonds: AtomicUsize,
    active_executes: AtomicUsize,
    max_active_executes: AtomicUsize,
    total_executes: AtomicUsize,
    hang_aborted: AtomicBool,
    hang_notify: Notify,
    /// Whether `disconnect()` emits the confirming Disconnected event,
    /// like a real stack does.
    confirm_disconnect: AtomicBool,
    events_tx: broadcast::Sender<TransportEvent>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            execute_scripts: Mutex::new(VecDeque::new()),
            connect_results: Mutex::new(VecDeque::new()),
            discovery_results: Mutex::new(VecDeque::new()),
            bond_results: Mutex::new(VecDeque::new()),
            executed: Mutex::new(Vec::new()),
            connect_flags: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
            bonds: AtomicUsize::new(0),
            active_executes: AtomicUsize::new(0),
            max_active_executes: AtomicUsize::new(0),
            total_executes: AtomicUsize::new(0),
            hang_aborted: AtomicBool::new(false),
            hang_notify: Notify::new(),
            confirm_disconnect: AtomicBool::new(true),
            events_tx,
        })
    }

    pub(crate) fn script_execute(&self, script: Script) {
        self.execute_scripts.lock().push_back(script);
    }

    pub(crate) fn script_connect(&self, result: Result<()>) {
        self.connect_results.lock().push_back(result);
    }

    pub(crate) fn script_discovery(&self, result: Result<ServiceDiscovery>) {
        self.discovery_results.lock().push_back(result);
    }

    pub(crate) fn script_bond(&self, result: Result<()>) {
        self.bond_results.lock().push_back(result);
    }

    /// Deliver a transport event to subscribers.
    pub(crate) fn send_event(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Make `disconnect()` silent, for tests that drive the confirming
    /// event themselves.
    #[allow(dead_code)]
    pub(crate) fn set_confirm_disconnect(&self, confirm: bool) {
        self.confirm_disconnect.store(confirm, Ordering::SeqCst);
    }

    /// Release every hung `execute` with a transport error.
    pub(crate) fn abort_hung_executes(&self) {
        self.hang_aborted.store(true, Ordering::SeqCst);
        self.hang_notify.notify_waiters();
    }

    pub(crate) fn execute_count(&self) -> usize {
        self.total_executes.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent_executes(&self) -> usize {
        self.max_active_executes.load(Ordering::SeqCst)
    }

    pub(crate) fn executed_kinds(&self) -> Vec<&'static str> {
        self.executed.lock().iter().map(GattRequest::kind).collect()
    }

    #[allow(dead_code)]
    pub(crate) fn connect_flags(&self) -> Vec<bool> {
        self.connect_flags.lock().clone()
    }

    pub(crate) fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub(crate) fn bond_count(&self) -> usize {
        self.bonds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, auto_connect: bool) -> Result<()> {
        self.connect_flags.lock().push(auto_connect);
        self.connect_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.confirm_disconnect.load(Ordering::SeqCst) {
            self.send_event(TransportEvent::Disconnected {
                reason: DisconnectReason::Terminated,
            });
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<ServiceDiscovery> {
        self.discovery_results
            .lock()
            .pop_front()
            .unwrap_or(Ok(ServiceDiscovery {
                mandatory_found: true,
                optional_found: true,
            }))
    }

    async fn execute(&self, request: &GattRequest) -> Result<Vec<u8>> {
        // Decrements on drop as well, so timed-out (dropped) calls do not
        // inflate the concurrency counter.
        struct ActiveGuard<'a>(&'a AtomicUsize);
        impl Drop for ActiveGuard<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }

        self.executed.lock().push(request.clone());
        self.total_executes.fetch_add(1, Ordering::SeqCst);
        let active = self.active_executes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_executes.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active_executes);

        let script = self
            .execute_scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Respond(Ok(Vec::new())));

        match script {
            Script::Respond(result) => result,
            Script::Hang => {
                while !self.hang_aborted.load(Ordering::SeqCst) {
                    self.hang_notify.notified().await;
                }
                Err(Error::Transport {
                    reason: "hung call aborted".into(),
                })
            }
        }
    }

    async fn request_bond(&self) -> Result<()> {
        self.bonds.fetch_add(1, Ordering::SeqCst);
        self.bond_results.lock().pop_front().unwrap_or(Ok(()))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }
}

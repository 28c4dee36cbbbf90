//! Per-device session lifecycle management.
//!
//! A [`Session`] owns everything for one peripheral: the lifecycle state
//! machine, the serialized operation queue, the merge buffers and the
//! callback sink. All state transitions, queue advancement and callback
//! emission happen on a single event-loop task per session, because the
//! radio link only supports one outstanding GATT transaction; separate
//! sessions share no mutable state and run independently.
//!
//! Connecting chains automatically: transport connect, then service
//! discovery, then the declared initialization requests, then the ready
//! event. The client never orchestrates discovery manually.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callbacks::{NoopCallbacks, SessionCallbacks};
use crate::error::{Error, Result};
use crate::merger::{DataMerger, MergeRegistry, MergeResult};
use crate::operation::{GattRequest, Operation};
use crate::queue::{OperationQueue, SettleOutcome, Settlement};
use crate::transport::{DeviceId, ServiceDiscovery, Transport, TransportEvent};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No connection has been requested yet.
    #[default]
    Idle,
    /// Connect requested; waiting for the transport.
    Connecting,
    /// Transport-level connection is up.
    Connected,
    /// Service discovery in progress.
    Discovering,
    /// Mandatory services found; initialization requests running.
    Initializing,
    /// Initialization complete; application requests accepted.
    Ready,
    /// Teardown in progress.
    Disconnecting,
    /// Terminal state for this connection cycle.
    Disconnected,
}

impl SessionState {
    /// Whether the transport link is up in this state.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Discovering | Self::Initializing | Self::Ready
        )
    }

    /// Whether application requests are accepted.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Discovering => "Discovering",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Disconnecting => "Disconnecting",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

/// Bonding sub-state, orthogonal to the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BondState {
    /// No bond with the peripheral.
    #[default]
    Unbonded,
    /// An operation hit insufficient authentication; bonding is needed.
    BondRequired,
    /// Bond request in progress.
    Bonding,
    /// The peripheral is bonded.
    Bonded,
    /// The last bond attempt failed.
    BondFailed,
}

impl std::fmt::Display for BondState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unbonded => "Unbonded",
            Self::BondRequired => "BondRequired",
            Self::Bonding => "Bonding",
            Self::Bonded => "Bonded",
            Self::BondFailed => "BondFailed",
        };
        f.write_str(name)
    }
}

/// Commands from the handle to the session task.
enum Command {
    Connect {
        auto_connect: bool,
        ack: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        ack: oneshot::Sender<Result<()>>,
    },
    Request {
        request: GattRequest,
        timeout: Option<Option<Duration>>,
        retry_attempts: Option<u32>,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    SetMerger {
        characteristic: Uuid,
        merger: Box<dyn DataMerger>,
    },
    RemoveMerger {
        characteristic: Uuid,
    },
}

/// Results of spawned transport calls, fed back into the event loop.
enum Internal {
    ConnectOutcome(Result<()>),
    DiscoveryOutcome(Result<ServiceDiscovery>),
    BondOutcome(Result<()>),
    DisconnectOutcome(Result<()>),
}

/// State mirrored for synchronous getters on the handle.
struct SharedState {
    state: RwLock<SessionState>,
    bond_state: RwLock<BondState>,
    services: RwLock<Option<ServiceDiscovery>>,
}

/// Builder for a [`Session`].
pub struct SessionBuilder {
    device: DeviceId,
    transport: Arc<dyn Transport>,
    callbacks: Arc<dyn SessionCallbacks>,
    init_requests: Vec<GattRequest>,
    mergers: Vec<(Uuid, Box<dyn DataMerger>)>,
}

impl SessionBuilder {
    /// Set the callback sink notified of lifecycle and data events.
    pub fn callbacks(mut self, callbacks: Arc<dyn SessionCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Declare the setup requests run after service discovery, before the
    /// session is promoted to ready. Executed in order through the queue.
    pub fn initialization(mut self, requests: impl IntoIterator<Item = GattRequest>) -> Self {
        self.init_requests.extend(requests);
        self
    }

    /// Configure a payload merger for a characteristic.
    pub fn merger(mut self, characteristic: Uuid, merger: Box<dyn DataMerger>) -> Self {
        self.mergers.push((characteristic, merger));
        self
    }

    /// Spawn the session's event-loop task and return its handle.
    pub fn build(self) -> Session {
        let shared = Arc::new(SharedState {
            state: RwLock::new(SessionState::Idle),
            bond_state: RwLock::new(BondState::Unbonded),
            services: RwLock::new(None),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();
        // Subscribe before spawning so no early event is missed.
        let events_rx = self.transport.events();

        let mut registry = MergeRegistry::new();
        for (characteristic, merger) in self.mergers {
            registry.set_merger(characteristic, merger);
        }

        let task = SessionTask {
            device: self.device.clone(),
            transport: self.transport.clone(),
            callbacks: self.callbacks,
            shared: shared.clone(),
            queue: OperationQueue::new(self.transport, settle_tx),
            mergers: registry,
            init_requests: self.init_requests,
            state: SessionState::Idle,
            bond_state: BondState::Unbonded,
            auto_connect: false,
            user_disconnect_requested: false,
            ready_emitted: false,
            pending_init: HashSet::new(),
            pending_connect_ack: None,
            pending_disconnect_acks: Vec::new(),
            command_rx,
            internal_rx,
            internal_tx,
            settle_rx,
        };
        tokio::spawn(task.run(events_rx));

        Session {
            device: self.device,
            command_tx,
            shared,
        }
    }
}

/// Handle to one device session.
///
/// Cloning is not supported; wrap in `Arc` to share. Dropping the handle
/// tears the session down and cancels any queued operations.
pub struct Session {
    device: DeviceId,
    command_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SharedState>,
}

impl Session {
    /// Start building a session over the given transport.
    pub fn builder(device: DeviceId, transport: Arc<dyn Transport>) -> SessionBuilder {
        SessionBuilder {
            device,
            transport,
            callbacks: Arc::new(NoopCallbacks),
            init_requests: Vec::new(),
            mergers: Vec::new(),
        }
    }

    /// The identity of the peripheral this session manages.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    /// Current bonding sub-state.
    pub fn bond_state(&self) -> BondState {
        *self.shared.bond_state.read()
    }

    /// Discovered service capabilities, populated after discovery.
    pub fn services(&self) -> Option<ServiceDiscovery> {
        *self.shared.services.read()
    }

    /// Request a connection to the device.
    ///
    /// Resolves once the transport-level connection is up (the `connected`
    /// event); discovery, initialization and readiness are reported through
    /// the callback sink. With `auto_connect` set, a later unexpected
    /// disconnect is classified as link loss instead of a disconnect.
    pub async fn connect(&self, auto_connect: bool) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send(Command::Connect { auto_connect, ack })?;
        rx.await.map_err(|_| Error::Internal("session terminated".into()))?
    }

    /// Request disconnection. Resolves once teardown is confirmed.
    pub async fn disconnect(&self) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.send(Command::Disconnect { ack })?;
        rx.await.map_err(|_| Error::Internal("session terminated".into()))?
    }

    /// Read the value of a characteristic.
    pub async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        self.request(GattRequest::Read { characteristic }).await
    }

    /// Write a value to a characteristic with response.
    pub async fn write(&self, characteristic: Uuid, payload: Vec<u8>) -> Result<()> {
        self.request(GattRequest::Write {
            characteristic,
            payload,
            with_response: true,
        })
        .await
        .map(|_| ())
    }

    /// Write a value to a characteristic without response.
    pub async fn write_without_response(
        &self,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.request(GattRequest::Write {
            characteristic,
            payload,
            with_response: false,
        })
        .await
        .map(|_| ())
    }

    /// Enable notifications on a characteristic.
    pub async fn enable_notifications(&self, characteristic: Uuid) -> Result<()> {
        self.request(GattRequest::EnableNotifications { characteristic })
            .await
            .map(|_| ())
    }

    /// Disable notifications on a characteristic.
    pub async fn disable_notifications(&self, characteristic: Uuid) -> Result<()> {
        self.request(GattRequest::DisableNotifications { characteristic })
            .await
            .map(|_| ())
    }

    /// Explicitly bond with the device.
    pub async fn create_bond(&self) -> Result<()> {
        self.request(GattRequest::CreateBond).await.map(|_| ())
    }

    /// Enqueue a GATT request with default timeout and retry policy.
    ///
    /// Rejected with [`Error::NotReady`] until the session reaches the
    /// ready state.
    pub async fn request(&self, request: GattRequest) -> Result<Vec<u8>> {
        self.request_inner(request, None, None).await
    }

    /// Enqueue a GATT request with an explicit deadline and retry budget.
    pub async fn request_with(
        &self,
        request: GattRequest,
        timeout: Option<Duration>,
        retry_attempts: u32,
    ) -> Result<Vec<u8>> {
        self.request_inner(request, Some(timeout), Some(retry_attempts))
            .await
    }

    /// Configure a payload merger for a characteristic.
    pub fn set_merger(&self, characteristic: Uuid, merger: Box<dyn DataMerger>) {
        let _ = self.command_tx.send(Command::SetMerger {
            characteristic,
            merger,
        });
    }

    /// Remove the merger for a characteristic, reverting to pass-through.
    pub fn remove_merger(&self, characteristic: Uuid) {
        let _ = self
            .command_tx
            .send(Command::RemoveMerger { characteristic });
    }

    async fn request_inner(
        &self,
        request: GattRequest,
        timeout: Option<Option<Duration>>,
        retry_attempts: Option<u32>,
    ) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Request {
            request,
            timeout,
            retry_attempts,
            reply,
        })?;
        rx.await.map_err(|_| Error::Cancelled {
            reason: "session terminated".into(),
        })?
    }

    fn send(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::Internal("session terminated".into()))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("state", &self.state())
            .field("bond_state", &self.bond_state())
            .finish()
    }
}

/// The per-session event loop. Owns the queue, the merge buffers and the
/// authoritative state; everything here runs sequentially.
struct SessionTask {
    device: DeviceId,
    transport: Arc<dyn Transport>,
    callbacks: Arc<dyn SessionCallbacks>,
    shared: Arc<SharedState>,
    queue: OperationQueue,
    mergers: MergeRegistry,
    init_requests: Vec<GattRequest>,
    state: SessionState,
    bond_state: BondState,
    auto_connect: bool,
    user_disconnect_requested: bool,
    ready_emitted: bool,
    /// Identities of initialization operations still outstanding.
    pending_init: HashSet<u64>,
    pending_connect_ack: Option<oneshot::Sender<Result<()>>>,
    pending_disconnect_acks: Vec<oneshot::Sender<Result<()>>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    settle_rx: mpsc::UnboundedReceiver<Settlement>,
}

impl SessionTask {
    async fn run(mut self, mut events_rx: broadcast::Receiver<TransportEvent>) {
        let mut events_open = true;
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Handle dropped: tear down and stop.
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal),
                Some(settlement) = self.settle_rx.recv() => self.handle_settlement(settlement),
                event = events_rx.recv(), if events_open => match event {
                    Ok(event) => self.handle_transport_event(event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(device = %self.device, missed, "transport event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events_open = false;
                    }
                },
            }
        }
        self.queue.cancel_all("session dropped");
        debug!(device = %self.device, "session task ended");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { auto_connect, ack } => self.handle_connect(auto_connect, ack),
            Command::Disconnect { ack } => self.handle_disconnect(ack),
            Command::Request {
                request,
                timeout,
                retry_attempts,
                reply,
            } => self.handle_request(request, timeout, retry_attempts, reply),
            Command::SetMerger {
                characteristic,
                merger,
            } => self.mergers.set_merger(characteristic, merger),
            Command::RemoveMerger { characteristic } => self.mergers.remove_merger(characteristic),
        }
    }

    fn handle_connect(&mut self, auto_connect: bool, ack: oneshot::Sender<Result<()>>) {
        if !matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
            let _ = ack.send(Err(Error::InvalidState {
                state: self.state.to_string(),
            }));
            return;
        }

        info!(device = %self.device, auto_connect, "connecting");
        self.auto_connect = auto_connect;
        self.user_disconnect_requested = false;
        self.ready_emitted = false;
        self.pending_init.clear();
        *self.shared.services.write() = None;
        // Transient bond sub-states do not survive a new connection cycle.
        if self.bond_state != BondState::Bonded {
            self.set_bond_state(BondState::Unbonded);
        }

        self.set_state(SessionState::Connecting);
        self.callbacks.on_device_connecting(&self.device);
        self.pending_connect_ack = Some(ack);

        let transport = self.transport.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = transport.connect(auto_connect).await;
            let _ = internal_tx.send(Internal::ConnectOutcome(outcome));
        });
    }

    fn handle_disconnect(&mut self, ack: oneshot::Sender<Result<()>>) {
        match self.state {
            SessionState::Idle | SessionState::Disconnected => {
                let _ = ack.send(Ok(()));
            }
            SessionState::Disconnecting => {
                self.pending_disconnect_acks.push(ack);
            }
            _ => {
                info!(device = %self.device, "disconnect requested");
                self.user_disconnect_requested = true;
                self.set_state(SessionState::Disconnecting);
                self.callbacks.on_device_disconnecting(&self.device);
                self.queue.cancel_all("disconnect requested");
                self.mergers.clear_buffers();
                self.pending_disconnect_acks.push(ack);
                self.spawn_disconnect();
            }
        }
    }

    fn handle_request(
        &mut self,
        request: GattRequest,
        timeout: Option<Option<Duration>>,
        retry_attempts: Option<u32>,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    ) {
        if !self.state.is_ready() {
            let _ = reply.send(Err(Error::NotReady));
            return;
        }
        let mut op = Operation::from_parts(request, reply);
        if let Some(timeout) = timeout {
            op = op.with_timeout(timeout);
        }
        if let Some(attempts) = retry_attempts {
            op = op.with_retry_attempts(attempts);
        }
        self.queue.enqueue(op);
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::ConnectOutcome(outcome) => self.handle_connect_outcome(outcome),
            Internal::DiscoveryOutcome(outcome) => self.handle_discovery_outcome(outcome),
            Internal::BondOutcome(outcome) => self.handle_bond_outcome(outcome),
            Internal::DisconnectOutcome(outcome) => {
                if let Err(error) = outcome {
                    if self.state == SessionState::Disconnecting {
                        // Transport could not confirm teardown; report and
                        // finalize anyway so the client sees session end.
                        self.callbacks
                            .on_error(&self.device, &error.to_string(), error.code());
                        self.finalize_disconnect(false);
                    }
                }
            }
        }
    }

    fn handle_connect_outcome(&mut self, outcome: Result<()>) {
        if self.state != SessionState::Connecting {
            // A disconnect raced the connect attempt; nothing to drive.
            return;
        }
        match outcome {
            Ok(()) => {
                self.set_state(SessionState::Connected);
                self.callbacks.on_device_connected(&self.device);
                if let Some(ack) = self.pending_connect_ack.take() {
                    let _ = ack.send(Ok(()));
                }
                // Service discovery chains automatically.
                self.set_state(SessionState::Discovering);
                let transport = self.transport.clone();
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let outcome = transport.discover_services().await;
                    let _ = internal_tx.send(Internal::DiscoveryOutcome(outcome));
                });
            }
            Err(error) => {
                warn!(device = %self.device, "connect failed: {}", error);
                self.callbacks
                    .on_error(&self.device, &error.to_string(), error.code());
                if let Some(ack) = self.pending_connect_ack.take() {
                    let _ = ack.send(Err(error));
                }
                // A failed connect never produced "connected"; it ends in a
                // plain disconnect event, never link loss.
                self.finalize_disconnect(false);
            }
        }
    }

    fn handle_discovery_outcome(&mut self, outcome: Result<ServiceDiscovery>) {
        if self.state != SessionState::Discovering {
            return;
        }
        match outcome {
            Ok(discovery) if !discovery.mandatory_found => {
                warn!(device = %self.device, "mandatory services missing");
                self.callbacks.on_device_not_supported(&self.device);
                self.force_disconnect();
            }
            Ok(discovery) => {
                *self.shared.services.write() = Some(discovery);
                self.set_state(SessionState::Initializing);
                self.callbacks
                    .on_services_discovered(&self.device, discovery.optional_found);
                if self.init_requests.is_empty() {
                    self.promote_ready();
                } else {
                    debug!(
                        device = %self.device,
                        count = self.init_requests.len(),
                        "running initialization requests"
                    );
                    for request in self.init_requests.clone() {
                        let (op, _completion) = Operation::new(request);
                        self.pending_init.insert(op.id());
                        self.queue.enqueue(op);
                    }
                }
            }
            Err(error) => {
                warn!(device = %self.device, "service discovery failed: {}", error);
                self.callbacks
                    .on_error(&self.device, &error.to_string(), error.code());
                self.force_disconnect();
            }
        }
    }

    fn handle_bond_outcome(&mut self, outcome: Result<()>) {
        if self.bond_state != BondState::Bonding {
            return;
        }
        match outcome {
            Ok(()) => {
                info!(device = %self.device, "bonded");
                self.set_bond_state(BondState::Bonded);
                self.callbacks.on_bonded(&self.device);
                // The operation that triggered bonding is still at the
                // head; it re-runs first.
                self.queue.resume();
            }
            Err(error) => {
                warn!(device = %self.device, "bonding failed: {}", error);
                self.set_bond_state(BondState::BondFailed);
                self.callbacks.on_bonding_failed(&self.device);
                let failed = self.queue.fail_head(Error::BondingFailed);
                self.queue.resume();
                if let Some(id) = failed {
                    if self.pending_init.remove(&id) {
                        self.force_disconnect();
                    }
                }
            }
        }
    }

    fn handle_settlement(&mut self, settlement: Settlement) {
        let id = settlement.id;
        match self.queue.on_settlement(id, settlement.result) {
            SettleOutcome::Stale | SettleOutcome::Retrying => {}
            SettleOutcome::Completed => {
                if self.pending_init.remove(&id) && self.pending_init.is_empty() {
                    self.promote_ready();
                }
            }
            SettleOutcome::AuthenticationRequired => {
                if self.bond_state == BondState::Bonded {
                    // Bonded and still refused: not recoverable by bonding
                    // again.
                    let error = Error::AuthenticationRequired;
                    self.callbacks
                        .on_error(&self.device, &error.to_string(), error.code());
                    let failed = self.queue.fail_head(error);
                    self.queue.resume();
                    if let Some(id) = failed {
                        if self.pending_init.remove(&id) {
                            self.force_disconnect();
                        }
                    }
                } else {
                    info!(device = %self.device, "bonding required");
                    self.set_bond_state(BondState::BondRequired);
                    self.callbacks.on_bonding_required(&self.device);
                    self.set_bond_state(BondState::Bonding);
                    let transport = self.transport.clone();
                    let internal_tx = self.internal_tx.clone();
                    tokio::spawn(async move {
                        let outcome = transport.request_bond().await;
                        let _ = internal_tx.send(Internal::BondOutcome(outcome));
                    });
                }
            }
            SettleOutcome::Failed { message, code } => {
                self.callbacks.on_error(&self.device, &message, code);
                if self.pending_init.remove(&id) {
                    // A device that cannot complete initialization is torn
                    // down rather than left half-configured.
                    self.force_disconnect();
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Disconnected { reason } => {
                if matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
                    return;
                }
                info!(device = %self.device, %reason, "transport disconnected");
                if let Some(ack) = self.pending_connect_ack.take() {
                    let _ = ack.send(Err(Error::ConnectionFailed {
                        reason: reason.to_string(),
                    }));
                }
                // Same transport signal, two meanings: an unexpected drop
                // on an auto-connect session is link loss, anything the
                // user asked for is a plain disconnect.
                let linkloss = !self.user_disconnect_requested && self.auto_connect;
                self.finalize_disconnect(linkloss);
            }
            TransportEvent::Notification {
                characteristic,
                data,
            } => {
                if !self.state.is_connected() {
                    return;
                }
                match self.mergers.supply(characteristic, &data) {
                    MergeResult::Incomplete => {}
                    MergeResult::Complete(payload) => {
                        self.callbacks
                            .on_data_received(&self.device, characteristic, payload);
                    }
                    MergeResult::Invalid(raw) => {
                        // Malformed data must reach the client; silently
                        // dropping it would hide protocol errors.
                        self.callbacks
                            .on_invalid_data_received(&self.device, characteristic, raw);
                    }
                }
            }
        }
    }

    /// Session-initiated teardown without a user request; never classified
    /// as link loss.
    fn force_disconnect(&mut self) {
        self.user_disconnect_requested = true;
        self.set_state(SessionState::Disconnecting);
        self.queue.cancel_all("disconnecting");
        self.mergers.clear_buffers();
        self.spawn_disconnect();
    }

    /// Settle into the terminal state and emit exactly one terminal event.
    fn finalize_disconnect(&mut self, linkloss: bool) {
        self.queue.cancel_all("disconnected");
        self.mergers.clear_buffers();
        self.pending_init.clear();
        self.set_state(SessionState::Disconnected);
        if linkloss {
            self.callbacks.on_linkloss_occurred(&self.device);
        } else {
            self.callbacks.on_device_disconnected(&self.device);
        }
        for ack in self.pending_disconnect_acks.drain(..) {
            let _ = ack.send(Ok(()));
        }
    }

    fn promote_ready(&mut self) {
        if self.state == SessionState::Initializing && !self.ready_emitted {
            self.set_state(SessionState::Ready);
            self.ready_emitted = true;
            info!(device = %self.device, "device ready");
            self.callbacks.on_device_ready(&self.device);
        }
    }

    fn spawn_disconnect(&self) {
        let transport = self.transport.clone();
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = transport.disconnect().await;
            let _ = internal_tx.send(Internal::DisconnectOutcome(outcome));
        });
    }

    fn set_state(&mut self, new_state: SessionState) {
        if self.state != new_state {
            debug!(
                device = %self.device,
                "session state changed: {} -> {}",
                self.state,
                new_state
            );
            self.state = new_state;
            *self.shared.state.write() = new_state;
        }
    }

    fn set_bond_state(&mut self, new_state: BondState) {
        if self.bond_state != new_state {
            debug!(
                device = %self.device,
                "bond state changed: {} -> {}",
                self.bond_state,
                new_state
            );
            self.bond_state = new_state;
            *self.shared.bond_state.write() = new_state;
        }
    }
}

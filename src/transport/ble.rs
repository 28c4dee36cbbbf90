//! btleplug-backed transport adapter.
//!
//! Wraps one [`Peripheral`] (plus the [`Adapter`] it was discovered on) as
//! a [`Transport`]. Characteristics are discovered and cached once per
//! connection; notifications and adapter-level disconnect events are
//! forwarded onto the transport event channel by background tasks started
//! after each successful connect.

use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::operation::GattRequest;
use crate::transport::{
    DisconnectReason, ServiceDiscovery, ServiceProfile, Transport, TransportEvent,
};

/// Reconnection attempts when connecting with `auto_connect`.
const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Delay between connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A [`Transport`] over a btleplug peripheral.
pub struct BleTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    profile: ServiceProfile,
    /// Cached characteristics by UUID, rebuilt on every discovery.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    events_tx: broadcast::Sender<TransportEvent>,
    /// Background forwarder tasks for the current connection.
    forwarders: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    /// Set while a locally requested teardown is in progress, so the
    /// disconnect watcher can report the right reason.
    local_teardown: Arc<AtomicBool>,
}

impl BleTransport {
    /// Wrap a peripheral, classifying later discovery against `profile`.
    pub fn new(adapter: Adapter, peripheral: Peripheral, profile: ServiceProfile) -> Self {
        let (events_tx, _) = broadcast::channel(256);

        Self {
            adapter,
            peripheral,
            profile,
            characteristics: RwLock::new(HashMap::new()),
            events_tx,
            forwarders: Mutex::new(Vec::new()),
            local_teardown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The wrapped peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    fn stop_forwarders(&self) {
        for handle in self.forwarders.lock().drain(..) {
            handle.abort();
        }
    }

    /// Start the notification and disconnect forwarders for a fresh
    /// connection, replacing any left over from the previous one.
    fn start_forwarders(&self) {
        self.stop_forwarders();

        let mut forwarders = self.forwarders.lock();

        let peripheral = self.peripheral.clone();
        let events_tx = self.events_tx.clone();
        forwarders.push(tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );
                let _ = events_tx.send(TransportEvent::Notification {
                    characteristic: notification.uuid,
                    data: notification.value,
                });
            }

            debug!("Notification stream ended");
        }));

        let adapter = self.adapter.clone();
        let target = self.peripheral.id();
        let events_tx = self.events_tx.clone();
        let local_teardown = self.local_teardown.clone();
        forwarders.push(tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == target {
                        // btleplug reports no status code; classify from
                        // whether we asked for the teardown.
                        let reason = if local_teardown.load(Ordering::SeqCst) {
                            DisconnectReason::Terminated
                        } else {
                            DisconnectReason::ConnectionTimeout
                        };
                        let _ = events_tx.send(TransportEvent::Disconnected { reason });
                        break;
                    }
                }
            }

            debug!("Disconnect watcher ended");
        }));
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&self, auto_connect: bool) -> Result<()> {
        self.local_teardown.store(false, Ordering::SeqCst);

        if self.peripheral.is_connected().await.unwrap_or(false) {
            debug!("Peripheral already connected at BLE level");
            self.start_forwarders();
            return Ok(());
        }

        let max_attempts = if auto_connect {
            MAX_CONNECT_ATTEMPTS
        } else {
            1
        };

        let mut attempts = 0;
        while attempts < max_attempts {
            attempts += 1;
            debug!("Connection attempt {} of {}", attempts, max_attempts);

            match self.peripheral.connect().await {
                Ok(()) => {
                    info!("Connected to peripheral");
                    self.start_forwarders();
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempts, e);
                    if attempts < max_attempts {
                        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(Error::ConnectionFailed {
            reason: format!("Failed after {} attempts", max_attempts),
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.local_teardown.store(true, Ordering::SeqCst);

        if !self.peripheral.is_connected().await.unwrap_or(false) {
            // Already down; the watcher may never fire, so confirm here.
            let _ = self.events_tx.send(TransportEvent::Disconnected {
                reason: DisconnectReason::Terminated,
            });
            return Ok(());
        }

        self.peripheral
            .disconnect()
            .await
            .map_err(Error::Bluetooth)?;

        info!("Disconnected from peripheral");
        Ok(())
    }

    async fn discover_services(&self) -> Result<ServiceDiscovery> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;

        let services = self.peripheral.services();

        let mut chars = self.characteristics.write();
        chars.clear();
        for service in &services {
            for characteristic in &service.characteristics {
                trace!(
                    "Found characteristic {} in service {}",
                    characteristic.uuid,
                    service.uuid
                );
                chars.insert(characteristic.uuid, characteristic.clone());
            }
        }
        drop(chars);

        let found: Vec<Uuid> = services.iter().map(|s| s.uuid).collect();
        let mandatory_found = self.profile.mandatory.iter().all(|u| found.contains(u));
        let optional_found = self.profile.optional.iter().all(|u| found.contains(u));

        debug!(
            services = found.len(),
            mandatory_found, optional_found, "service discovery complete"
        );

        Ok(ServiceDiscovery {
            mandatory_found,
            optional_found,
        })
    }

    async fn execute(&self, request: &GattRequest) -> Result<Vec<u8>> {
        match request {
            GattRequest::Read { characteristic } => {
                let ch = self.characteristic(*characteristic)?;
                let data = self
                    .peripheral
                    .read(&ch)
                    .await
                    .map_err(Error::Bluetooth)?;
                trace!("Read {} bytes from {}", data.len(), characteristic);
                Ok(data)
            }
            GattRequest::Write {
                characteristic,
                payload,
                with_response,
            } => {
                let ch = self.characteristic(*characteristic)?;
                let write_type = if *with_response {
                    WriteType::WithResponse
                } else {
                    WriteType::WithoutResponse
                };
                self.peripheral
                    .write(&ch, payload, write_type)
                    .await
                    .map_err(Error::Bluetooth)?;
                trace!("Wrote {} bytes to {}", payload.len(), characteristic);
                Ok(Vec::new())
            }
            GattRequest::EnableNotifications { characteristic } => {
                let ch = self.characteristic(*characteristic)?;
                self.peripheral
                    .subscribe(&ch)
                    .await
                    .map_err(Error::Bluetooth)?;
                debug!("Subscribed to notifications from {}", characteristic);
                Ok(Vec::new())
            }
            GattRequest::DisableNotifications { characteristic } => {
                let ch = self.characteristic(*characteristic)?;
                self.peripheral
                    .unsubscribe(&ch)
                    .await
                    .map_err(Error::Bluetooth)?;
                debug!("Unsubscribed from notifications from {}", characteristic);
                Ok(Vec::new())
            }
            GattRequest::CreateBond => self.request_bond().await.map(|()| Vec::new()),
        }
    }

    async fn request_bond(&self) -> Result<()> {
        // btleplug exposes no pairing API; the platform stack pairs on
        // demand when an attribute requires it.
        Err(Error::NotSupported {
            operation: "bonding through btleplug".to_string(),
        })
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_forwarders();
    }
}

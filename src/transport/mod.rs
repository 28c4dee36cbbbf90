//! The transport adapter boundary.
//!
//! A [`Transport`] is the session's view of the native BLE stack: raw
//! connect/disconnect, service discovery, attribute I/O and bonding, plus an
//! event stream for things that happen outside a request/response pair
//! (unexpected disconnects, notifications). The session layer owns all
//! lifecycle semantics; a transport only moves bytes and reports facts.
//!
//! The production adapter backed by btleplug lives in [`ble`]. Tests and
//! embedders with their own stacks implement [`Transport`] directly.

pub mod ble;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::operation::GattRequest;

pub use ble::BleTransport;

/// Opaque, stable identity of a remote peripheral.
///
/// Immutable for the lifetime of a session. The string form is whatever the
/// transport uses to address the device (a MAC address on Linux/Windows, a
/// platform UUID on macOS).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device identity from its transport address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The transport address as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The services a session expects to find on the peripheral.
///
/// Mandatory services gate the session: if any is missing after discovery
/// the device is reported as not supported and disconnected. Optional
/// services are only reported as a flag to the callback sink.
#[derive(Debug, Clone, Default)]
pub struct ServiceProfile {
    /// Services that must be present for the device to be usable.
    pub mandatory: Vec<Uuid>,
    /// Secondary services that enrich the profile but are not required.
    pub optional: Vec<Uuid>,
}

impl ServiceProfile {
    /// A profile requiring the given services, with no optional ones.
    pub fn mandatory(services: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            mandatory: services.into_iter().collect(),
            optional: Vec::new(),
        }
    }

    /// Add optional secondary services to the profile.
    pub fn with_optional(mut self, services: impl IntoIterator<Item = Uuid>) -> Self {
        self.optional.extend(services);
        self
    }
}

/// Outcome of service discovery, classified against a [`ServiceProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDiscovery {
    /// All mandatory services were found.
    pub mandatory_found: bool,
    /// All optional secondary services were found as well.
    pub optional_found: bool,
}

/// Why the transport reported a disconnect.
///
/// Advisory: the session classifies user-vs-linkloss from its own connect
/// configuration, not from this reason. The reason is surfaced in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DisconnectReason {
    /// Local host terminated the connection.
    Terminated,
    /// Supervision timeout: the link dropped without a teardown handshake.
    ConnectionTimeout,
    /// The remote device closed the connection.
    RemoteUserTerminated,
    /// Any other transport status code.
    Other(u16),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminated => write!(f, "terminated by host"),
            Self::ConnectionTimeout => write!(f, "connection timeout"),
            Self::RemoteUserTerminated => write!(f, "terminated by remote"),
            Self::Other(code) => write!(f, "status {:#06x}", code),
        }
    }
}

/// Asynchronous events delivered by a transport outside request futures.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The connection dropped, expectedly or not.
    Disconnected {
        /// Transport-reported reason for the disconnect.
        reason: DisconnectReason,
    },
    /// A notification or indication arrived on a characteristic.
    Notification {
        /// The characteristic that produced the value.
        characteristic: Uuid,
        /// The raw attribute value.
        data: Vec<u8>,
    },
}

/// The raw BLE stack a session drives.
///
/// Implementations must be cancel-safe: a request future may be dropped
/// when its operation times out, and the underlying stack must still settle
/// cleanly. Exactly one request is issued at a time per transport; the
/// serialization is enforced by the session's operation queue.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the physical connection.
    ///
    /// With `auto_connect` set, the transport should keep attempting
    /// reconnection after unexpected drops; the flag also changes how the
    /// session classifies later disconnects.
    async fn connect(&self, auto_connect: bool) -> Result<()>;

    /// Tear down the physical connection.
    ///
    /// A [`TransportEvent::Disconnected`] event must still be delivered
    /// once the teardown completes.
    async fn disconnect(&self) -> Result<()>;

    /// Discover services and classify them against the configured profile.
    async fn discover_services(&self) -> Result<ServiceDiscovery>;

    /// Execute a single GATT request and return its response payload.
    ///
    /// Reads return the attribute value; writes and subscription changes
    /// return an empty payload.
    async fn execute(&self, request: &GattRequest) -> Result<Vec<u8>>;

    /// Initiate bonding with the peripheral and resolve with the outcome.
    async fn request_bond(&self) -> Result<()>;

    /// Subscribe to asynchronous transport events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_service_profile_builder() {
        let svc = Uuid::from_u128(0x0000_180d_0000_1000_8000_00805f9b34fb);
        let opt = Uuid::from_u128(0x0000_180f_0000_1000_8000_00805f9b34fb);
        let profile = ServiceProfile::mandatory([svc]).with_optional([opt]);
        assert_eq!(profile.mandatory, vec![svc]);
        assert_eq!(profile.optional, vec![opt]);
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(
            DisconnectReason::ConnectionTimeout.to_string(),
            "connection timeout"
        );
        assert_eq!(DisconnectReason::Other(0x3e).to_string(), "status 0x003e");
    }
}

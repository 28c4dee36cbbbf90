//! The client-facing callback sink.
//!
//! A session reports every lifecycle transition and every received payload
//! through a [`SessionCallbacks`] implementation supplied by the host
//! application. All methods have no-op default bodies, so an implementor
//! only overrides the events it cares about.
//!
//! Delivery contract: for a single session, callbacks fire strictly in the
//! order the corresponding transitions occur, each at most once per event.
//! No callback is invoked outside the state it is documented for, and
//! `on_device_ready` fires exactly once per successful connection cycle.

use bytes::Bytes;
use uuid::Uuid;

use crate::transport::DeviceId;

/// Observer for session lifecycle and data-reception events.
///
/// Implementations must be cheap and non-blocking: callbacks are invoked
/// from the session's event-loop task, so a long-running body stalls queue
/// advancement for that device. It is safe to issue new requests on the
/// [`Session`](crate::session::Session) handle from within a callback; they
/// are appended through the session mailbox, never executed re-entrantly.
#[allow(unused_variables)]
pub trait SessionCallbacks: Send + Sync + 'static {
    /// The session started connecting to the device.
    ///
    /// Followed by `on_device_connected`, or by `on_error` and a terminal
    /// `on_device_disconnected` if the connect attempt fails.
    fn on_device_connecting(&self, device: &DeviceId) {}

    /// The transport-level connection is up.
    ///
    /// This does not mean the application may start communication: service
    /// discovery is initiated automatically and ends with either
    /// `on_services_discovered` or `on_device_not_supported`.
    fn on_device_connected(&self, device: &DeviceId) {}

    /// The user requested disconnection and teardown has begun.
    fn on_device_disconnecting(&self, device: &DeviceId) {}

    /// The device has disconnected.
    ///
    /// Only emitted when the session was connected without the
    /// auto-reconnect option, or when the disconnect was requested by the
    /// user; otherwise `on_linkloss_occurred` is emitted instead.
    fn on_device_disconnected(&self, device: &DeviceId) {}

    /// Connection to a device connected with the auto-reconnect option was
    /// lost unexpectedly.
    fn on_linkloss_occurred(&self, device: &DeviceId) {}

    /// Service discovery finished and the mandatory services were found.
    ///
    /// `optional_services_found` reports whether the optional secondary
    /// services were present as well. Not called if the mandatory services
    /// are missing; `on_device_not_supported` fires in that case.
    fn on_services_discovered(&self, device: &DeviceId, optional_services_found: bool) {}

    /// All initialization requests have completed; application requests are
    /// accepted from this point on.
    fn on_device_ready(&self, device: &DeviceId) {}

    /// An in-flight request hit an insufficient-authentication error on an
    /// unbonded device; the session is about to start bonding.
    fn on_bonding_required(&self, device: &DeviceId) {}

    /// The device has been successfully bonded.
    fn on_bonded(&self, device: &DeviceId) {}

    /// Bonding was attempted and did not complete.
    fn on_bonding_failed(&self, device: &DeviceId) {}

    /// An unrecoverable error occurred.
    ///
    /// Advisory only: the event does not itself change the lifecycle state.
    /// `code` is the value of [`Error::code`](crate::error::Error::code)
    /// for the underlying failure.
    fn on_error(&self, device: &DeviceId, message: &str, code: i32) {}

    /// Service discovery finished but the mandatory services were not found.
    /// The session disconnects the device afterwards.
    fn on_device_not_supported(&self, device: &DeviceId) {}

    /// A complete logical payload arrived on a characteristic.
    ///
    /// If a [`DataMerger`](crate::merger::DataMerger) is configured for the
    /// characteristic, `payload` is the merged result; otherwise it is the
    /// raw notification value.
    fn on_data_received(&self, device: &DeviceId, characteristic: Uuid, payload: Bytes) {}

    /// Received data did not conform to the configured merge scheme.
    ///
    /// `payload` carries whatever was accumulated so far, so the protocol
    /// error is visible to the client rather than silently dropped.
    fn on_invalid_data_received(&self, device: &DeviceId, characteristic: Uuid, payload: Bytes) {}
}

/// A callback sink that ignores every event. Useful for tests and for
/// sessions driven purely through the request API.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl SessionCallbacks for NoopCallbacks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bodies_are_noops() {
        let callbacks = NoopCallbacks;
        let device = DeviceId::new("00:11:22:33:44:55");
        callbacks.on_device_connecting(&device);
        callbacks.on_device_ready(&device);
        callbacks.on_error(&device, "boom", 3);
        callbacks.on_data_received(&device, Uuid::nil(), Bytes::from_static(b"\x01"));
    }
}

// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]

//! # ble-session
//!
//! A cross-platform library for managing connected BLE client sessions:
//! per-device lifecycle management, serialized GATT operation queueing and
//! multi-packet payload reassembly over btleplug.
//!
//! A [`Session`] owns everything for one peripheral. Connecting chains
//! automatically through service discovery and the declared initialization
//! requests before the device is reported ready; application requests are
//! serialized through a FIFO queue with per-operation timeouts, retries for
//! transient transport failures and an automatic bonding sub-flow. Lifecycle
//! and data events are delivered to a [`SessionCallbacks`] sink.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ble_session::{
//!     BleTransport, DeviceId, Error, GattRequest, Result, ServiceProfile, Session,
//! };
//! use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
//! use btleplug::platform::Manager;
//! use uuid::Uuid;
//!
//! const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
//! const BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Find a peripheral with btleplug.
//!     let manager = Manager::new().await?;
//!     let adapter = manager
//!         .adapters()
//!         .await?
//!         .into_iter()
//!         .next()
//!         .ok_or(Error::BluetoothUnavailable)?;
//!     adapter.start_scan(ScanFilter::default()).await?;
//!     tokio::time::sleep(Duration::from_secs(3)).await;
//!     let peripheral = adapter
//!         .peripherals()
//!         .await?
//!         .into_iter()
//!         .next()
//!         .ok_or(Error::BluetoothUnavailable)?;
//!
//!     // Wrap it in a session that requires the battery service and
//!     // subscribes to the battery level during initialization.
//!     let device = DeviceId::new(format!("{:?}", peripheral.id()));
//!     let transport = Arc::new(BleTransport::new(
//!         adapter,
//!         peripheral,
//!         ServiceProfile::mandatory([BATTERY_SERVICE]),
//!     ));
//!     let session = Session::builder(device, transport)
//!         .initialization([GattRequest::EnableNotifications {
//!             characteristic: BATTERY_LEVEL,
//!         }])
//!         .build();
//!
//!     session.connect(false).await?;
//!     while !session.state().is_ready() {
//!         tokio::time::sleep(Duration::from_millis(100)).await;
//!     }
//!
//!     let level = session.read(BATTERY_LEVEL).await?;
//!     println!("Battery level: {}%", level.first().copied().unwrap_or(0));
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for state and identity types

// Public modules
pub mod callbacks;
pub mod error;
pub mod merger;
pub mod operation;
pub mod session;
pub mod transport;

mod queue;

// Re-exports for convenience
pub use callbacks::{NoopCallbacks, SessionCallbacks};
pub use error::{Error, Result};
pub use operation::{GattRequest, DEFAULT_OPERATION_TIMEOUT, DEFAULT_RETRY_ATTEMPTS};
pub use session::{BondState, Session, SessionBuilder, SessionState};

// Re-export commonly used types from submodules
pub use merger::{
    DataMerger, FixedLengthMerger, LengthPrefixMerger, MergeDecision, MergeRegistry, MergeResult,
};
pub use transport::{
    BleTransport, DeviceId, DisconnectReason, ServiceDiscovery, ServiceProfile, Transport,
    TransportEvent,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Session>();
        let _ = std::any::TypeId::of::<SessionState>();
        let _ = std::any::TypeId::of::<BondState>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<GattRequest>();
        let _ = std::any::TypeId::of::<DeviceId>();
        let _ = std::any::TypeId::of::<MergeRegistry>();
    }

    #[test]
    fn test_default_policies() {
        assert_eq!(DEFAULT_OPERATION_TIMEOUT.as_secs(), 30);
        assert_eq!(DEFAULT_RETRY_ATTEMPTS, 3);
    }
}

//! Error types for the ble-session crate.

use thiserror::Error;

/// The main error type for this crate.
///
/// Failures are also delivered to the [`SessionCallbacks`] sink as events;
/// the numeric code passed to `on_error` comes from [`Error::code`].
///
/// [`SessionCallbacks`]: crate::callbacks::SessionCallbacks
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// A transport-level failure reported by the transport adapter.
    #[error("Transport error: {reason}")]
    Transport {
        /// Description of the transport failure.
        reason: String,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Operation requires a connection but the device is not connected.
    #[error("Device not connected")]
    NotConnected,

    /// The session has not reached the ready state yet.
    ///
    /// Application-level requests issued before initialization completes
    /// are rejected with this error rather than queued.
    #[error("Device not ready")]
    NotReady,

    /// The request is not valid in the session's current state.
    #[error("Invalid state for request: {state}")]
    InvalidState {
        /// The session state the request was made in.
        state: String,
    },

    /// A GATT operation did not receive a transport response in time.
    #[error("Operation timed out")]
    Timeout,

    /// A GATT operation was cancelled by session teardown.
    #[error("Operation cancelled: {reason}")]
    Cancelled {
        /// Why the operation was cancelled.
        reason: String,
    },

    /// The peripheral requires bonding before this attribute can be accessed.
    ///
    /// Routed to the bonding sub-flow internally; surfaces only when the
    /// transport cannot bond.
    #[error("Insufficient authentication, bonding required")]
    AuthenticationRequired,

    /// Bonding was attempted and failed.
    #[error("Bonding failed")]
    BondingFailed,

    /// Service discovery did not find the mandatory services.
    #[error("Device not supported: mandatory services missing")]
    UnsupportedDevice,

    /// Received data did not conform to the configured merge scheme.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The requested operation is not supported.
    #[error("Operation not supported: {operation}")]
    NotSupported {
        /// Description of the unsupported operation.
        operation: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable numeric code for this error, as delivered to
    /// `SessionCallbacks::on_error`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Bluetooth(_) => 1,
            Self::BluetoothUnavailable => 2,
            Self::Transport { .. } => 3,
            Self::ConnectionFailed { .. } => 4,
            Self::NotConnected => 5,
            Self::NotReady => 6,
            Self::InvalidState { .. } => 7,
            Self::Timeout => 8,
            Self::Cancelled { .. } => 9,
            Self::AuthenticationRequired => 10,
            Self::BondingFailed => 11,
            Self::UnsupportedDevice => 12,
            Self::InvalidData { .. } => 13,
            Self::CharacteristicNotFound { .. } => 14,
            Self::NotSupported { .. } => 15,
            Self::Internal(_) => 16,
        }
    }

    /// Whether this failure may be retried in place by the operation queue.
    ///
    /// Only transport-level hiccups qualify. Timeouts are terminal per the
    /// queue's deadline policy, and authentication errors route to the
    /// bonding sub-flow instead of plain retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Bluetooth(_) | Self::Transport { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            Error::BluetoothUnavailable,
            Error::Transport { reason: "x".into() },
            Error::ConnectionFailed { reason: "x".into() },
            Error::NotConnected,
            Error::NotReady,
            Error::Timeout,
            Error::Cancelled { reason: "x".into() },
            Error::AuthenticationRequired,
            Error::BondingFailed,
            Error::UnsupportedDevice,
        ];
        let mut codes: Vec<i32> = errors.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transport {
            reason: "hiccup".into()
        }
        .is_transient());
        assert!(!Error::Timeout.is_transient());
        assert!(!Error::AuthenticationRequired.is_transient());
        assert!(!Error::Cancelled {
            reason: "teardown".into()
        }
        .is_transient());
    }
}

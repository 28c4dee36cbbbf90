//! GATT request and operation value objects.
//!
//! A [`GattRequest`] describes what to do on the wire; an [`Operation`]
//! wraps a request with the bookkeeping the queue needs: a unique identity,
//! a deadline, a retry budget and the caller's completion continuation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default per-operation deadline.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of attempts for transient transport failures.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// A single GATT request against a characteristic (or the link itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattRequest {
    /// Read the value of a characteristic.
    Read {
        /// Target characteristic.
        characteristic: Uuid,
    },
    /// Write a value to a characteristic.
    Write {
        /// Target characteristic.
        characteristic: Uuid,
        /// The value to write.
        payload: Vec<u8>,
        /// Write with response (acknowledged) vs. write command.
        with_response: bool,
    },
    /// Enable notifications/indications on a characteristic.
    EnableNotifications {
        /// Target characteristic.
        characteristic: Uuid,
    },
    /// Disable notifications/indications on a characteristic.
    DisableNotifications {
        /// Target characteristic.
        characteristic: Uuid,
    },
    /// Create a bond with the peripheral.
    CreateBond,
}

impl GattRequest {
    /// The characteristic this request targets, if any.
    pub fn characteristic(&self) -> Option<Uuid> {
        match self {
            Self::Read { characteristic }
            | Self::Write { characteristic, .. }
            | Self::EnableNotifications { characteristic }
            | Self::DisableNotifications { characteristic } => Some(*characteristic),
            Self::CreateBond => None,
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::EnableNotifications { .. } => "enable-notifications",
            Self::DisableNotifications { .. } => "disable-notifications",
            Self::CreateBond => "create-bond",
        }
    }
}

/// A queued GATT operation.
///
/// Created by the session and owned by the operation queue until it
/// completes, fails terminally or is cancelled. The continuation is always
/// settled exactly once; dropping an unsettled operation closes the channel,
/// which the awaiting caller observes as cancellation.
pub struct Operation {
    id: u64,
    request: GattRequest,
    timeout: Option<Duration>,
    attempts_left: u32,
    completion: Option<oneshot::Sender<Result<Vec<u8>>>>,
}

impl Operation {
    /// Create an operation with default timeout and retry policy, returning
    /// it together with the receiver for its completion.
    pub fn new(request: GattRequest) -> (Self, oneshot::Receiver<Result<Vec<u8>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::from_parts(request, tx), rx)
    }

    /// Create an operation completing into an existing channel.
    pub(crate) fn from_parts(
        request: GattRequest,
        completion: oneshot::Sender<Result<Vec<u8>>>,
    ) -> Self {
        Self {
            id: NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed),
            request,
            timeout: Some(DEFAULT_OPERATION_TIMEOUT),
            attempts_left: DEFAULT_RETRY_ATTEMPTS,
            completion: Some(completion),
        }
    }

    /// Override the deadline. `None` disables the timeout entirely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the retry budget for transient transport failures.
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.attempts_left = attempts.max(1);
        self
    }

    /// The unique identity used to match transport settlements.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The wire request.
    pub fn request(&self) -> &GattRequest {
        &self.request
    }

    /// The deadline for this operation, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Consume one retry attempt. Returns true if a retry is still allowed.
    pub(crate) fn consume_attempt(&mut self) -> bool {
        if self.attempts_left > 1 {
            self.attempts_left -= 1;
            true
        } else {
            false
        }
    }

    /// Settle the operation successfully.
    pub(crate) fn complete(mut self, payload: Vec<u8>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Ok(payload));
        }
    }

    /// Settle the operation with a terminal failure.
    pub(crate) fn fail(mut self, error: Error) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Err(error));
        }
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("request", &self.request.kind())
            .field("timeout", &self.timeout)
            .field("attempts_left", &self.attempts_left)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_ids_are_unique() {
        let (a, _rx_a) = Operation::new(GattRequest::CreateBond);
        let (b, _rx_b) = Operation::new(GattRequest::CreateBond);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_retry_budget() {
        let (mut op, _rx) = Operation::new(GattRequest::Read {
            characteristic: Uuid::nil(),
        });
        // Default budget of 3 attempts allows 2 retries.
        assert!(op.consume_attempt());
        assert!(op.consume_attempt());
        assert!(!op.consume_attempt());
    }

    #[tokio::test]
    async fn test_completion_delivery() {
        let (op, rx) = Operation::new(GattRequest::Read {
            characteristic: Uuid::nil(),
        });
        op.complete(vec![1, 2, 3]);
        assert_eq!(rx.await.unwrap().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_delivery() {
        let (op, rx) = Operation::new(GattRequest::CreateBond);
        op.fail(Error::Timeout);
        assert!(matches!(rx.await.unwrap(), Err(Error::Timeout)));
    }

    #[test]
    fn test_request_characteristic() {
        let uuid = Uuid::from_u128(0xdead_beef);
        let read = GattRequest::Read {
            characteristic: uuid,
        };
        assert_eq!(read.characteristic(), Some(uuid));
        assert_eq!(GattRequest::CreateBond.characteristic(), None);
    }
}

//! The serialized GATT operation pipeline.
//!
//! A BLE link supports exactly one outstanding GATT transaction, so every
//! request for a device flows through an [`OperationQueue`]: strict FIFO,
//! at most one operation in flight, settlements matched by operation
//! identity so stale or duplicate transport responses can never be credited
//! to the wrong operation.
//!
//! The queue is owned and driven exclusively by its session's event-loop
//! task. Execution happens on spawned sub-tasks that race the transport
//! call against the operation's deadline and report back through the
//! settlement channel.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::operation::{GattRequest, Operation};
use crate::transport::Transport;

/// A finished transport call for a specific operation identity.
#[derive(Debug)]
pub(crate) struct Settlement {
    /// Identity of the operation this settlement belongs to.
    pub id: u64,
    /// The transport outcome.
    pub result: Result<Vec<u8>>,
}

/// What the queue did with a settlement, for the session to act on.
#[derive(Debug)]
pub(crate) enum SettleOutcome {
    /// The settlement did not match the in-flight operation; dropped.
    Stale,
    /// The operation completed and its continuation was resolved.
    Completed,
    /// Transient transport failure; the same operation was re-issued.
    Retrying,
    /// Insufficient authentication: the queue paused itself and the
    /// operation was re-admitted at the head, keeping its FIFO position.
    /// The session is expected to run the bonding sub-flow and then
    /// `resume` or `fail_head`.
    AuthenticationRequired,
    /// The operation failed terminally and its continuation was resolved
    /// with the error. Message and code are provided for `on_error`.
    Failed {
        /// Human-readable failure description.
        message: String,
        /// Stable error code.
        code: i32,
    },
}

/// Ordered, single-consumer execution pipeline for one session.
pub(crate) struct OperationQueue {
    transport: Arc<dyn Transport>,
    settle_tx: mpsc::UnboundedSender<Settlement>,
    pending: VecDeque<Operation>,
    in_flight: Option<Operation>,
    paused: bool,
}

impl OperationQueue {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        settle_tx: mpsc::UnboundedSender<Settlement>,
    ) -> Self {
        Self {
            transport,
            settle_tx,
            pending: VecDeque::new(),
            in_flight: None,
            paused: false,
        }
    }

    /// Append an operation and start it if the link is free.
    pub(crate) fn enqueue(&mut self, op: Operation) {
        trace!(id = op.id(), kind = op.request().kind(), "operation enqueued");
        self.pending.push_back(op);
        self.run_next();
    }

    /// Number of operations waiting or executing.
    pub(crate) fn len(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight.is_some())
    }

    /// Stop starting new operations. The in-flight operation, if any, is
    /// left to settle normally.
    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume execution from the head of the queue.
    pub(crate) fn resume(&mut self) {
        self.paused = false;
        self.run_next();
    }

    /// Fail the operation at the head of the queue terminally.
    ///
    /// Used when the bonding sub-flow gives up on the operation that
    /// triggered it. Returns the failed operation's id.
    pub(crate) fn fail_head(&mut self, error: Error) -> Option<u64> {
        let op = self.pending.pop_front()?;
        let id = op.id();
        warn!(id, "failing queued operation: {}", error);
        op.fail(error);
        Some(id)
    }

    /// Credit a settlement to the in-flight operation.
    pub(crate) fn on_settlement(&mut self, id: u64, result: Result<Vec<u8>>) -> SettleOutcome {
        let Some(op) = self.in_flight.take() else {
            trace!(id, "dropping stale settlement");
            return SettleOutcome::Stale;
        };
        if op.id() != id {
            // Cancelled or timed-out identity; the continuation was already
            // resolved, so the late response is dropped here.
            trace!(id, "dropping stale settlement");
            self.in_flight = Some(op);
            return SettleOutcome::Stale;
        }

        match result {
            Ok(payload) => {
                debug!(id, kind = op.request().kind(), "operation completed");
                op.complete(payload);
                self.run_next();
                SettleOutcome::Completed
            }
            Err(Error::AuthenticationRequired) => {
                // Bonding is not a plain retry: hold the queue and keep the
                // operation at the head so FIFO order survives the detour.
                debug!(id, "operation requires bonding, pausing queue");
                self.paused = true;
                self.pending.push_front(op);
                SettleOutcome::AuthenticationRequired
            }
            Err(error) if error.is_transient() => {
                let mut op = op;
                if op.consume_attempt() {
                    debug!(id, "transient failure, retrying in place: {}", error);
                    self.spawn_execute(&op);
                    self.in_flight = Some(op);
                    SettleOutcome::Retrying
                } else {
                    warn!(id, "retry budget exhausted: {}", error);
                    let (message, code) = (error.to_string(), error.code());
                    op.fail(error);
                    self.run_next();
                    SettleOutcome::Failed { message, code }
                }
            }
            Err(error) => {
                warn!(id, kind = op.request().kind(), "operation failed: {}", error);
                let (message, code) = (error.to_string(), error.code());
                op.fail(error);
                self.run_next();
                SettleOutcome::Failed { message, code }
            }
        }
    }

    /// Fail everything with `Cancelled`. Invoked on session teardown.
    ///
    /// The in-flight operation's continuation is resolved immediately and
    /// its identity invalidated, so the outstanding transport call settles
    /// into the stale path instead of double-completing.
    pub(crate) fn cancel_all(&mut self, reason: &str) {
        let cancelled = self.len();
        if let Some(op) = self.in_flight.take() {
            op.fail(Error::Cancelled {
                reason: reason.to_string(),
            });
        }
        for op in self.pending.drain(..) {
            op.fail(Error::Cancelled {
                reason: reason.to_string(),
            });
        }
        self.paused = false;
        if cancelled > 0 {
            debug!(count = cancelled, reason, "cancelled queued operations");
        }
    }

    /// Start the next pending operation if nothing is in flight.
    fn run_next(&mut self) {
        if self.paused || self.in_flight.is_some() {
            return;
        }
        let Some(op) = self.pending.pop_front() else {
            return;
        };
        self.spawn_execute(&op);
        self.in_flight = Some(op);
    }

    /// Issue the transport call for `op` on a sub-task, racing its deadline.
    fn spawn_execute(&self, op: &Operation) {
        let id = op.id();
        let request = op.request().clone();
        let deadline = op.timeout();
        let transport = self.transport.clone();
        let settle_tx = self.settle_tx.clone();

        trace!(id, kind = request.kind(), "operation started");

        tokio::spawn(async move {
            let call = async {
                match &request {
                    GattRequest::CreateBond => {
                        transport.request_bond().await.map(|_| Vec::new())
                    }
                    other => transport.execute(other).await,
                }
            };
            let result = match deadline {
                Some(timeout) => match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    // The transport future is dropped here; a response after
                    // the deadline can no longer reach this operation.
                    Err(_) => Err(Error::Timeout),
                },
                None => call.await,
            };
            let _ = settle_tx.send(Settlement { id, result });
        });
    }
}

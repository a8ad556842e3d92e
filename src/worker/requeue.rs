//! Requeue sink: the bounded channel back to the producer side.
//!
//! Offers never wait. A full or closed sink means the transaction is dropped,
//! which is logged at error level and counted separately from requeues.

use async_channel::{Sender, TrySendError};

use crate::observability::metrics;
use crate::transaction::SharedTransaction;

/// Why a transaction is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueReason {
    /// The endpoint's breaker is open; no remote call was made.
    Blocked,
    /// The execution returned an error.
    Failed,
    /// The worker was stopping before the execution could start.
    Stopping,
}

impl RequeueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequeueReason::Blocked => "blocked",
            RequeueReason::Failed => "failed",
            RequeueReason::Stopping => "stopping",
        }
    }
}

/// Why the sink refused a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Full,
    Closed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Full => "full",
            DropReason::Closed => "closed",
        }
    }
}

#[derive(Clone)]
pub struct RequeueSink {
    tx: Sender<SharedTransaction>,
}

impl RequeueSink {
    pub fn new(tx: Sender<SharedTransaction>) -> Self {
        Self { tx }
    }

    /// Hand `txn` back without blocking. Returns false if it was dropped.
    pub fn offer(&self, txn: SharedTransaction, reason: RequeueReason) -> bool {
        match self.try_offer(txn, reason) {
            Ok(()) => {
                metrics::record_requeued(reason.as_str());
                true
            }
            Err(dropped) => {
                metrics::record_dropped(dropped.as_str());
                false
            }
        }
    }

    fn try_offer(&self, txn: SharedTransaction, reason: RequeueReason) -> Result<(), DropReason> {
        let (txn, dropped) = match self.tx.try_send(txn) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(txn)) => (txn, DropReason::Full),
            Err(TrySendError::Closed(txn)) => (txn, DropReason::Closed),
        };

        let message = match dropped {
            DropReason::Full => {
                "Dropping transaction because the retry queue is too busy to handle another one"
            }
            DropReason::Closed => "Dropping transaction because the retry queue is closed",
        };
        tracing::error!(
            endpoint = %txn.target(),
            units = txn.unit_count(),
            reason = reason.as_str(),
            dropped = dropped.as_str(),
            "{message}"
        );
        Err(dropped)
    }
}

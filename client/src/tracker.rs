//! Per-operation transaction tracking.
//!
//! Every mutating operation runs under an [`OperationKey`]. At most one
//! operation per key is in flight: [`Tracker::begin`] rejects a second one
//! with [`Error::Busy`] instead of letting two submissions race for the same
//! status. The returned [`PendingOperation`] releases the key when dropped,
//! whatever way the operation ends.
use std::{
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    chain::{Confirmation, TransactionHandle},
    error::{CallError, Error, Result},
    events::{EventBus, TxStatus},
};

/// Names an operation a user can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKey {
    /// Token approval ahead of a fee-bearing call.
    Approve,
    /// Proposal creation.
    CreateProposal,
    /// Vote on a proposal.
    Vote,
    /// Winner lookup.
    DeclareWinner,
}

impl OperationKey {
    /// Stable identifier of the key, e.g. `create-proposal`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::CreateProposal => "create-proposal",
            Self::Vote => "vote",
            Self::DeclareWinner => "declare-winner",
        }
    }
}

impl fmt::Display for OperationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct Registry {
    in_flight: HashSet<OperationKey>,
    statuses: HashMap<OperationKey, TxStatus>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // The registry holds plain data, a panic elsewhere can't leave it
    // half-written.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps track of in-flight operations and the last status of each key.
#[derive(Debug, Clone)]
pub struct Tracker {
    registry: Arc<Mutex<Registry>>,
    events: EventBus,
    timeout: Option<Duration>,
}

impl Tracker {
    /// Creates a tracker that publishes on `events` and gives up waiting for
    /// a confirmation after `timeout`.
    #[must_use]
    pub fn new(events: EventBus, timeout: Option<Duration>) -> Self {
        Self { registry: Arc::default(), events, timeout }
    }

    /// Marks `key` as in flight.
    ///
    /// # Errors
    ///
    /// * [`Error::Busy`] - If an operation with the same key is in flight.
    pub fn begin(&self, key: OperationKey) -> Result<PendingOperation> {
        let mut registry = lock(&self.registry);
        if !registry.in_flight.insert(key) {
            warn!(%key, "rejecting operation, key is busy");
            return Err(Error::Busy(key));
        }
        debug!(%key, "operation started");
        Ok(PendingOperation { key, tracker: self.clone() })
    }

    /// Whether an operation with `key` is in flight.
    #[must_use]
    pub fn is_pending(&self, key: OperationKey) -> bool {
        lock(&self.registry).in_flight.contains(&key)
    }

    /// The in-flight key that reflects the current step, if any. When an
    /// approval runs inside a proposal creation, that is the approval.
    #[must_use]
    pub fn in_flight(&self) -> Option<OperationKey> {
        lock(&self.registry).in_flight.iter().min().copied()
    }

    /// Last reported status of the transaction under `key`.
    #[must_use]
    pub fn status(&self, key: OperationKey) -> Option<TxStatus> {
        lock(&self.registry).statuses.get(&key).cloned()
    }

    fn report(&self, key: OperationKey, status: TxStatus) {
        lock(&self.registry).statuses.insert(key, status.clone());
        self.events.status(key, status);
    }
}

/// An in-flight operation. Dropping it frees the key.
#[derive(Debug)]
#[must_use = "the key is released as soon as this is dropped"]
pub struct PendingOperation {
    key: OperationKey,
    tracker: Tracker,
}

impl PendingOperation {
    /// The key this operation holds.
    #[must_use]
    pub fn key(&self) -> OperationKey {
        self.key
    }

    /// Submits a transaction with `submit`, then waits for `confirm` to
    /// report it included, reporting `submitted` and then `confirmed` or
    /// `failed` for this key.
    ///
    /// Nothing is retried.
    ///
    /// # Errors
    ///
    /// * Whatever `submit` fails with.
    /// * [`Error::TransactionFailed`] - If the transaction reverted or the
    ///   confirmation could not be obtained.
    /// * [`Error::TimedOut`] - If confirmation took longer than the
    ///   tracker's timeout.
    pub async fn track<S, C, F>(
        &self,
        submit: S,
        confirm: C,
    ) -> Result<Confirmation>
    where
        S: Future<Output = Result<TransactionHandle>>,
        C: FnOnce(TransactionHandle) -> F,
        F: Future<Output = Result<Confirmation, CallError>>,
    {
        let key = self.key;
        let handle = match submit.await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%key, %err, "submission failed");
                self.tracker.report(key, TxStatus::Failed(err.to_string()));
                return Err(err);
            }
        };

        let hash = handle.hash;
        info!(%key, tx = %hash, "transaction submitted");
        self.tracker.report(key, TxStatus::Submitted(hash));

        let outcome = match self.tracker.timeout {
            Some(after) => {
                if let Ok(outcome) =
                    tokio::time::timeout(after, confirm(handle)).await
                {
                    outcome
                } else {
                    warn!(%key, tx = %hash, ?after, "confirmation timed out");
                    self.tracker.report(
                        key,
                        TxStatus::Failed(format!("not confirmed after {after:?}")),
                    );
                    return Err(Error::TimedOut { key, after });
                }
            }
            None => confirm(handle).await,
        };

        match outcome {
            Ok(confirmation) => {
                info!(%key, tx = %hash, "transaction confirmed");
                self.tracker.report(key, TxStatus::Confirmed(hash));
                Ok(confirmation)
            }
            Err(err) => {
                warn!(%key, tx = %hash, %err, "transaction failed");
                self.tracker.report(key, TxStatus::Failed(err.to_string()));
                Err(Error::transaction(key, &err))
            }
        }
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        lock(&self.tracker.registry).in_flight.remove(&self.key);
        debug!(key = %self.key, "operation finished");
    }
}
